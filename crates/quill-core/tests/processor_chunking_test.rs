//! Chunk-boundary behavior of the tool-call processor.
//!
//! Every property is checked against every way of splitting the input in
//! two and against every fixed chunk size, so a sentinel or payload split
//! at any byte position is covered.

use quill_core::{
    CollectingRenderer, InvocationQueue, ProcessorEvent, Sentinels, ToolCallProcessor,
};
use serde_json::json;
use std::sync::Arc;

struct Run {
    content: String,
    queue: InvocationQueue,
    events: Vec<ProcessorEvent>,
}

fn run_chunks(sentinels: &Sentinels, chunks: &[&str]) -> Run {
    let renderer = Arc::new(CollectingRenderer::new());
    let mut processor = ToolCallProcessor::new(sentinels.clone());
    processor.attach(renderer.clone());
    for chunk in chunks {
        processor.process(chunk);
    }
    let queue = processor.finish();
    processor.detach();
    Run {
        content: renderer.content(),
        queue,
        events: renderer.events(),
    }
}

/// Every split of `input` into chunks: all two-way splits at char
/// boundaries, then every fixed chunk size.
fn chunkings(input: &str) -> Vec<Vec<&str>> {
    let boundaries: Vec<usize> = (0..=input.len())
        .filter(|&i| input.is_char_boundary(i))
        .collect();

    let mut result = Vec::new();
    for &split in &boundaries {
        result.push(vec![&input[..split], &input[split..]]);
    }
    for size in 1..=input.len().max(1) {
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < input.len() {
            let mut end = (start + size).min(input.len());
            while !input.is_char_boundary(end) {
                end += 1;
            }
            chunks.push(&input[start..end]);
            start = end;
        }
        result.push(chunks);
    }
    result
}

fn tool_names(queue: &InvocationQueue) -> Vec<String> {
    queue.iter().map(|i| i.tool_name.clone()).collect()
}

#[test]
fn test_plain_content_is_chunking_invariant() {
    let sentinels = Sentinels::default();
    // Near-misses of the open sentinel must pass through untouched
    let input = "Plain text with <tool and <tool_cal and a < sign, ünïcödé, and a trailing <tool_c";

    for chunks in chunkings(input) {
        let run = run_chunks(&sentinels, &chunks);
        assert_eq!(run.content, input, "chunks: {:?}", chunks);
        assert!(run.queue.is_empty());
    }
}

#[test]
fn test_directives_queue_in_closing_order_for_any_chunking() {
    let sentinels = Sentinels::default();
    let input = concat!(
        "First <tool_call>{\"name\": \"read_file\", \"args\": {\"file_path\": \"a.rs\"}}</tool_call>",
        " then <tool_call>{\"tool\": \"shell\", \"args\": {\"command\": \"ls </tool\"}}</tool_call>",
        " and <tool_call>{\"name\": \"write_file\", \"args\": {\"file_path\": \"b\", \"content\": \"<tool_call>\"}}</tool_call> done."
    );

    for chunks in chunkings(input) {
        let run = run_chunks(&sentinels, &chunks);
        assert_eq!(
            tool_names(&run.queue),
            vec!["read_file", "shell", "write_file"],
            "chunks: {:?}",
            chunks
        );
        assert_eq!(run.content, "First  then  and  done.");
        assert_eq!(
            run.queue.get(1).unwrap().args,
            json!({"command": "ls </tool"})
        );
        assert_eq!(
            run.queue.get(2).unwrap().args,
            json!({"file_path": "b", "content": "<tool_call>"})
        );
        for (position, invocation) in run.queue.iter().enumerate() {
            assert_eq!(invocation.index, position);
            let span = invocation.source_span.clone().unwrap();
            assert!(input[span.clone()].starts_with("<tool_call>"));
            assert!(input[span].ends_with("</tool_call>"));
        }
    }
}

#[test]
fn test_unterminated_directive_appears_once_for_any_chunking() {
    let sentinels = Sentinels::default();
    let input = "Working on it <tool_call>{\"name\": \"shell\", \"args\": {\"command\": \"ls\"}";

    for chunks in chunkings(input) {
        let run = run_chunks(&sentinels, &chunks);
        assert!(run.queue.is_empty());
        assert_eq!(run.content, input, "chunks: {:?}", chunks);
        assert_eq!(run.content.matches("<tool_call>").count(), 1);
    }
}

#[test]
fn test_malformed_payload_reports_one_parse_error_for_any_chunking() {
    let sentinels = Sentinels::default();
    let input = "a <tool_call>{\"name\": \"shell\", \"args\": \"ls\"}</tool_call> b";
    let raw = "<tool_call>{\"name\": \"shell\", \"args\": \"ls\"}</tool_call>";

    for chunks in chunkings(input) {
        let run = run_chunks(&sentinels, &chunks);
        assert!(run.queue.is_empty());
        assert_eq!(run.content, input);

        let parse_errors: Vec<&ProcessorEvent> = run
            .events
            .iter()
            .filter(|e| matches!(e, ProcessorEvent::ParseError { .. }))
            .collect();
        assert_eq!(parse_errors.len(), 1, "chunks: {:?}", chunks);
        match parse_errors[0] {
            ProcessorEvent::ParseError { raw: reported, .. } => assert_eq!(reported, raw),
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[test]
fn test_worked_example_with_uppercase_sentinels() {
    let sentinels = Sentinels::new("<TOOL>", "</TOOL>").unwrap();
    let chunks = [
        "Sure, I'll do it. <TOOL",
        ">{\"name\":\"write\",\"args\":{\"path\":\"a.txt\"}}</TOOL>",
    ];

    let run = run_chunks(&sentinels, &chunks);

    assert_eq!(run.content, "Sure, I'll do it. ");
    assert_eq!(run.queue.len(), 1);
    let invocation = run.queue.get(0).unwrap();
    assert_eq!(invocation.tool_name, "write");
    assert_eq!(invocation.args, json!({"path": "a.txt"}));

    // Same result however the text is split
    let joined = chunks.concat();
    for other in chunkings(&joined) {
        let rerun = run_chunks(&sentinels, &other);
        assert_eq!(rerun.content, run.content);
        assert_eq!(rerun.queue, run.queue);
    }
}

#[test]
fn test_overlapping_sentinel_characters() {
    // Extra brackets around bracket sentinels: the leftmost open wins and
    // the payload ends at the first close.
    let sentinels = Sentinels::new("[[", "]]").unwrap();
    let input = "x [[[{\"name\": \"a\"}]]] y";

    for chunks in chunkings(input) {
        let run = run_chunks(&sentinels, &chunks);
        // "[[" opens, payload is "[{...}" which is not an object
        assert!(run.queue.is_empty(), "chunks: {:?}", chunks);
        assert_eq!(run.content, input);
    }

    let input = "x [[{\"name\": \"a\"}]]] y";
    for chunks in chunkings(input) {
        let run = run_chunks(&sentinels, &chunks);
        assert_eq!(tool_names(&run.queue), vec!["a"]);
        assert_eq!(run.content, "x ] y");
    }
}

#[test]
fn test_content_events_precede_queue_events_in_stream_order() {
    let sentinels = Sentinels::default();
    let run = run_chunks(
        &sentinels,
        &["one <tool_call>{\"name\": \"a\"}</tool_call> two"],
    );

    assert_eq!(
        run.events,
        vec![
            ProcessorEvent::Content("one ".to_string()),
            ProcessorEvent::InvocationQueued {
                index: 0,
                tool_name: "a".to_string()
            },
            ProcessorEvent::Content(" two".to_string()),
        ]
    );
}
