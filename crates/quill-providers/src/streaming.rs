//! Shared helpers for turning SSE byte streams into completion chunks.

use crate::{CompletionChunk, ToolCall, Usage};

/// Decode everything in `pending` except a trailing partial character.
///
/// A character cut off by a read boundary stays behind for the next call.
/// Invalid byte sequences become U+FFFD so one bad byte never stalls the
/// stream. `None` when nothing could be decoded yet.
pub fn decode_utf8_streaming(pending: &mut Vec<u8>) -> Option<String> {
    let mut decoded = String::new();
    let mut consumed = 0;

    while consumed < pending.len() {
        match std::str::from_utf8(&pending[consumed..]) {
            Ok(text) => {
                decoded.push_str(text);
                consumed = pending.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                decoded.push_str(&String::from_utf8_lossy(&pending[consumed..consumed + valid]));
                consumed += valid;
                match e.error_len() {
                    Some(bad) => {
                        decoded.push(char::REPLACEMENT_CHARACTER);
                        consumed += bad;
                    }
                    None => break,
                }
            }
        }
    }

    pending.drain(..consumed);
    (!decoded.is_empty()).then_some(decoded)
}

/// Next full line of an SSE buffer: `Some(Some(payload))` for `data:` lines,
/// `Some(None)` for any other line, `None` until a newline is buffered.
pub(crate) fn next_sse_data(buffer: &mut String) -> Option<Option<String>> {
    let newline = buffer.find('\n')?;
    let line: String = buffer.drain(..=newline).collect();
    Some(
        line.trim()
            .strip_prefix("data:")
            .map(|payload| payload.trim_start().to_owned()),
    )
}

/// The closing chunk of a stream. An empty `tool_calls` is sent as `None`.
pub fn make_final_chunk(tool_calls: Vec<ToolCall>, usage: Option<Usage>) -> CompletionChunk {
    CompletionChunk {
        finished: true,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        usage,
        ..Default::default()
    }
}

pub fn make_text_chunk(content: String) -> CompletionChunk {
    CompletionChunk {
        content,
        ..Default::default()
    }
}
