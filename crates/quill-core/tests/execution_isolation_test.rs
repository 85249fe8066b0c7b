//! Execution phase: isolation of failures, ordering and concurrency limits.

use quill_core::{
    execute_queue, CollectingRenderer, CoreError, ExecContext, ExecutionPolicy,
    InvocationQueue, InvocationStatus, ProcessorEvent, Renderer, ToolCallProcessor,
    ToolDescriptor, ToolRegistry,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn queue_of(calls: &[(&str, Value)]) -> InvocationQueue {
    let mut processor = ToolCallProcessor::default();
    for (name, args) in calls {
        processor.enqueue_native(*name, args.clone());
    }
    processor.finish()
}

fn echo_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "echo",
        "Echo the text back",
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }),
        |args: Value, _ctx: ExecContext| async move {
            anyhow::Ok(args["text"].as_str().unwrap_or_default().to_string())
        },
    )
}

fn failing_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "fail",
        "Always fails",
        json!({"type": "object"}),
        |_args: Value, _ctx: ExecContext| async move {
            Err::<String, _>(anyhow::anyhow!("disk on fire"))
        },
    )
}

fn panicking_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "panic",
        "Always panics",
        json!({"type": "object"}),
        |_args: Value, _ctx: ExecContext| async move {
            if true {
                panic!("handler bug");
            }
            anyhow::Ok(String::new())
        },
    )
}

fn sleepy_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "sleep",
        "Sleep for `ms` milliseconds",
        json!({
            "type": "object",
            "properties": {"ms": {"type": "integer"}},
            "required": ["ms"]
        }),
        |args: Value, _ctx: ExecContext| async move {
            let ms = args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            anyhow::Ok(format!("slept {}", ms))
        },
    )
}

fn registry(tools: Vec<ToolDescriptor>) -> ToolRegistry {
    ToolRegistry::from_descriptors(tools).unwrap()
}

fn ctx() -> ExecContext {
    ExecContext::new(std::env::temp_dir())
}

#[tokio::test]
async fn test_middle_failure_is_isolated() {
    let registry = registry(vec![echo_tool(), failing_tool()]);
    let queue = queue_of(&[
        ("echo", json!({"text": "one"})),
        ("fail", json!({})),
        ("echo", json!({"text": "three"})),
    ]);
    let renderer = CollectingRenderer::new();

    let outcomes = execute_queue(
        queue,
        &registry,
        &ctx(),
        &ExecutionPolicy::unbounded(),
        Some(&renderer as &dyn Renderer),
    )
    .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].result, Ok("one".to_string()));
    assert_eq!(
        outcomes[1].result,
        Err(CoreError::Handler {
            tool: "fail".to_string(),
            message: "disk on fire".to_string()
        })
    );
    assert_eq!(outcomes[2].result, Ok("three".to_string()));
    assert_eq!(renderer.settled_count(), 3);

    let failed: Vec<usize> = renderer
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ProcessorEvent::InvocationSettled {
                index,
                status: InvocationStatus::Failed(_),
                ..
            } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![1]);
}

#[tokio::test]
async fn test_unknown_tool_and_bad_arguments_fail_only_themselves() {
    let registry = registry(vec![echo_tool()]);
    let queue = queue_of(&[
        ("missing", json!({})),
        ("echo", json!({"text": 42})),
        ("echo", json!({})),
        ("echo", json!({"text": "ok"})),
    ]);

    let outcomes = execute_queue(queue, &registry, &ctx(), &ExecutionPolicy::unbounded(), None).await;

    assert_eq!(
        outcomes[0].result,
        Err(CoreError::UnknownTool {
            name: "missing".to_string()
        })
    );
    assert!(matches!(
        outcomes[1].result,
        Err(CoreError::InvalidArguments { .. })
    ));
    assert!(matches!(
        outcomes[2].result,
        Err(CoreError::InvalidArguments { .. })
    ));
    assert_eq!(outcomes[3].result, Ok("ok".to_string()));
}

#[tokio::test]
async fn test_panicking_handler_is_contained() {
    let registry = registry(vec![echo_tool(), panicking_tool()]);
    let queue = queue_of(&[("panic", json!({})), ("echo", json!({"text": "still here"}))]);

    let outcomes = execute_queue(queue, &registry, &ctx(), &ExecutionPolicy::unbounded(), None).await;

    match &outcomes[0].result {
        Err(CoreError::Handler { tool, message }) => {
            assert_eq!(tool, "panic");
            assert!(message.contains("handler bug"));
        }
        other => panic!("expected handler error, got {:?}", other),
    }
    assert_eq!(outcomes[1].result, Ok("still here".to_string()));
}

#[tokio::test]
async fn test_timeout_fails_only_the_slow_invocation() {
    let registry = registry(vec![sleepy_tool()]);
    let queue = queue_of(&[("sleep", json!({"ms": 5_000})), ("sleep", json!({"ms": 1}))]);
    let policy = ExecutionPolicy {
        max_concurrency: None,
        timeout: Some(Duration::from_millis(100)),
    };

    let outcomes = execute_queue(queue, &registry, &ctx(), &policy, None).await;

    assert_eq!(
        outcomes[0].result,
        Err(CoreError::Timeout {
            tool: "sleep".to_string(),
            after: Duration::from_millis(100)
        })
    );
    assert_eq!(outcomes[1].result, Ok("slept 1".to_string()));
}

#[tokio::test]
async fn test_results_follow_queue_order_not_completion_order() {
    let registry = registry(vec![sleepy_tool()]);
    let queue = queue_of(&[
        ("sleep", json!({"ms": 80})),
        ("sleep", json!({"ms": 1})),
        ("sleep", json!({"ms": 40})),
    ]);

    let outcomes = execute_queue(queue, &registry, &ctx(), &ExecutionPolicy::unbounded(), None).await;

    let results: Vec<String> = outcomes
        .into_iter()
        .map(|o| o.result.unwrap())
        .collect();
    assert_eq!(results, vec!["slept 80", "slept 1", "slept 40"]);
}

fn tracking_tool(in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "track",
        "Record how many calls run at once",
        json!({"type": "object"}),
        move |_args: Value, _ctx: ExecContext| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                anyhow::Ok(String::new())
            }
        },
    )
}

#[tokio::test]
async fn test_concurrency_limit_bounds_in_flight_handlers() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let registry = registry(vec![tracking_tool(in_flight.clone(), peak.clone())]);
    let calls: Vec<(&str, Value)> = (0..6).map(|_| ("track", json!({}))).collect();
    let policy = ExecutionPolicy {
        max_concurrency: Some(2),
        timeout: None,
    };

    let outcomes = execute_queue(queue_of(&calls), &registry, &ctx(), &policy, None).await;

    assert_eq!(outcomes.len(), 6);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unbounded_policy_runs_invocations_together() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let registry = registry(vec![tracking_tool(in_flight.clone(), peak.clone())]);
    let calls: Vec<(&str, Value)> = (0..4).map(|_| ("track", json!({}))).collect();

    execute_queue(queue_of(&calls), &registry, &ctx(), &ExecutionPolicy::unbounded(), None).await;

    assert_eq!(peak.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_follow_up_messages_carry_results_and_errors() {
    let registry = registry(vec![echo_tool(), failing_tool()]);
    let queue = queue_of(&[("echo", json!({"text": "hi"})), ("fail", json!({}))]);

    let outcomes = execute_queue(queue, &registry, &ctx(), &ExecutionPolicy::unbounded(), None).await;

    assert_eq!(outcomes[0].to_message().content, "Tool result (echo #0):\nhi");
    assert_eq!(
        outcomes[1].to_message().content,
        "Tool error (fail #1): tool 'fail' failed: disk on fire"
    );
}
