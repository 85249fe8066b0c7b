//! Incremental directive scanner with a deferred execution queue.
//!
//! The processor is fed the model's text chunk by chunk. Plain text is
//! forwarded to the attached renderer as soon as it cannot be the start of
//! an open sentinel; directives are parsed when their close sentinel
//! arrives and queued for execution after the stream ends. Sentinels split
//! across chunks are resumed transparently, so the output is independent
//! of how the stream was chunked.

use crate::directive::{self, Sentinels};
use crate::renderer::{ProcessorEvent, Renderer};
use serde_json::Value;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

/// A parsed, queued request to run a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvocation {
    /// Position in the queue
    pub index: usize,
    pub tool_name: String,
    pub args: Value,
    /// Byte range of the raw directive in the logical stream; `None` for
    /// calls received through the provider's native tool channel
    pub source_span: Option<Range<usize>>,
}

/// The queue of one turn, frozen when the stream ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationQueue {
    invocations: Vec<PendingInvocation>,
}

impl InvocationQueue {
    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PendingInvocation> {
        self.invocations.iter()
    }

    pub fn get(&self, index: usize) -> Option<&PendingInvocation> {
        self.invocations.get(index)
    }

    pub fn into_vec(self) -> Vec<PendingInvocation> {
        self.invocations
    }
}

impl IntoIterator for InvocationQueue {
    type Item = PendingInvocation;
    type IntoIter = std::vec::IntoIter<PendingInvocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.invocations.into_iter()
    }
}

impl<'a> IntoIterator for &'a InvocationQueue {
    type Item = &'a PendingInvocation;
    type IntoIter = std::slice::Iter<'a, PendingInvocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.invocations.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorMode {
    /// Looking for an open sentinel
    Scanning,
    /// Inside a directive, looking for the close sentinel
    Accumulating,
}

pub struct ToolCallProcessor {
    sentinels: Sentinels,
    mode: ProcessorMode,
    /// Suffix of the scanned text that may be the start of an open
    /// sentinel; always shorter than the sentinel
    carry: String,
    /// Raw directive text so far, open sentinel included
    span: String,
    /// Stream offset of the current directive's open sentinel
    span_start: usize,
    /// Bytes received since the last reset
    received: usize,
    queue: Vec<PendingInvocation>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl ToolCallProcessor {
    pub fn new(sentinels: Sentinels) -> Self {
        Self {
            sentinels,
            mode: ProcessorMode::Scanning,
            carry: String::new(),
            span: String::new(),
            span_start: 0,
            received: 0,
            queue: Vec::new(),
            renderer: None,
        }
    }

    pub fn sentinels(&self) -> &Sentinels {
        &self.sentinels
    }

    pub fn mode(&self) -> ProcessorMode {
        self.mode
    }

    /// Number of invocations queued since the last `finish()`.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Register the sole observer. An already attached renderer is
    /// detached (and cleaned up) first.
    pub fn attach(&mut self, renderer: Arc<dyn Renderer>) {
        if self.detach() {
            warn!("Replaced a renderer that was still attached");
        }
        self.renderer = Some(renderer);
    }

    /// Remove the observer, calling its `cleanup()`. Returns whether one
    /// was attached.
    pub fn detach(&mut self) -> bool {
        match self.renderer.take() {
            Some(renderer) => {
                renderer.cleanup();
                true
            }
            None => false,
        }
    }

    pub fn renderer(&self) -> Option<Arc<dyn Renderer>> {
        self.renderer.clone()
    }

    /// Feed the next chunk of model text.
    pub fn process(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let mut buffer = std::mem::take(&mut self.carry);
        let buffer_start = self.received - buffer.len();
        buffer.push_str(chunk);
        self.received += chunk.len();

        let mut pos = 0;
        while pos < buffer.len() {
            let rest = &buffer[pos..];
            match self.mode {
                ProcessorMode::Scanning => {
                    let open = self.sentinels.open();
                    if let Some(found) = rest.find(open) {
                        self.emit_content(&rest[..found]);
                        self.mode = ProcessorMode::Accumulating;
                        self.span.clear();
                        self.span.push_str(open);
                        self.span_start = buffer_start + pos + found;
                        pos += found + open.len();
                    } else {
                        let keep = partial_prefix_len(rest, open);
                        let emit_end = rest.len() - keep;
                        self.emit_content(&rest[..emit_end]);
                        self.carry.push_str(&rest[emit_end..]);
                        pos = buffer.len();
                    }
                }
                ProcessorMode::Accumulating => {
                    let open_len = self.sentinels.open().len();
                    let close = self.sentinels.close();
                    let old_len = self.span.len();
                    self.span.push_str(rest);

                    // A close sentinel may straddle the previous chunk
                    let search_from = floor_char_boundary(
                        &self.span,
                        open_len.max(old_len.saturating_sub(close.len() - 1)),
                    );
                    match self.span[search_from..].find(close) {
                        Some(found) => {
                            let end = search_from + found + close.len();
                            self.span.truncate(end);
                            pos += end - old_len;
                            self.close_directive();
                        }
                        None => pos = buffer.len(),
                    }
                }
            }
        }
    }

    /// Queue an invocation that arrived outside the text stream.
    pub fn enqueue_native(&mut self, tool_name: impl Into<String>, args: Value) {
        let tool_name = tool_name.into();
        self.push_invocation(tool_name, args, None);
    }

    /// End of stream: flush buffered text and hand over the queue.
    ///
    /// The processor is reset and can be reused for the next turn; the
    /// attached renderer stays attached.
    pub fn finish(&mut self) -> InvocationQueue {
        match self.mode {
            ProcessorMode::Scanning => {
                let carry = std::mem::take(&mut self.carry);
                self.emit_content(&carry);
            }
            ProcessorMode::Accumulating => {
                let span = std::mem::take(&mut self.span);
                warn!(
                    "Stream ended inside an unterminated tool directive ({} bytes); showing it as text",
                    span.len()
                );
                self.emit_content(&span);
            }
        }

        let invocations = std::mem::take(&mut self.queue);
        debug!("Processor finished with {} queued invocation(s)", invocations.len());

        self.mode = ProcessorMode::Scanning;
        self.carry.clear();
        self.span.clear();
        self.span_start = 0;
        self.received = 0;

        InvocationQueue { invocations }
    }

    fn close_directive(&mut self) {
        let span = std::mem::take(&mut self.span);
        self.mode = ProcessorMode::Scanning;

        let open_len = self.sentinels.open().len();
        let close_len = self.sentinels.close().len();
        let payload = &span[open_len..span.len() - close_len];
        let source_span = self.span_start..self.span_start + span.len();

        match directive::parse_payload(payload) {
            Ok(parsed) => self.push_invocation(parsed.tool_name, parsed.args, Some(source_span)),
            Err(error) => {
                let reason = match error {
                    crate::CoreError::Parse { reason } => reason,
                    other => other.to_string(),
                };
                warn!("Ignoring malformed tool directive: {}", reason);
                self.emit(ProcessorEvent::ParseError {
                    raw: span.clone(),
                    reason,
                });
                self.emit_content(&span);
            }
        }
    }

    fn push_invocation(&mut self, tool_name: String, args: Value, source_span: Option<Range<usize>>) {
        let index = self.queue.len();
        debug!("Queued invocation #{} of '{}'", index, tool_name);
        self.emit(ProcessorEvent::InvocationQueued {
            index,
            tool_name: tool_name.clone(),
        });
        self.queue.push(PendingInvocation {
            index,
            tool_name,
            args,
            source_span,
        });
    }

    fn emit_content(&self, text: &str) {
        if !text.is_empty() {
            self.emit(ProcessorEvent::Content(text.to_string()));
        }
    }

    fn emit(&self, event: ProcessorEvent) {
        if let Some(renderer) = &self.renderer {
            renderer.on_event(&event);
        }
    }
}

impl Default for ToolCallProcessor {
    fn default() -> Self {
        Self::new(Sentinels::default())
    }
}

impl Drop for ToolCallProcessor {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for ToolCallProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallProcessor")
            .field("sentinels", &self.sentinels)
            .field("mode", &self.mode)
            .field("queued", &self.queue.len())
            .field("attached", &self.renderer.is_some())
            .finish()
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `pattern`.
fn partial_prefix_len(text: &str, pattern: &str) -> usize {
    let max = text.len().min(pattern.len().saturating_sub(1));
    (1..=max)
        .rev()
        .find(|&len| pattern.is_char_boundary(len) && text.ends_with(&pattern[..len]))
        .unwrap_or(0)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
