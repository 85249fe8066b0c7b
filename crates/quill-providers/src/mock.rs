//! Scripted provider for tests.
//!
//! Each call to `stream()` or `complete()` takes the next [`MockResponse`]
//! off a queue. A response is a list of [`MockChunk`]s delivered one per
//! stream item, so a test decides exactly where the model's text is split,
//! where native tool calls appear and where the transport breaks.
//!
//! ```rust,ignore
//! use quill_providers::{MockProvider, MockResponse};
//!
//! let provider = MockProvider::new()
//!     .with_response(MockResponse::streaming(vec!["<tool_", "call>..."]));
//! let log = provider.request_log();
//! ```

use crate::{
    CompletionChunk, CompletionRequest, CompletionResponse, CompletionStream, LLMProvider,
    ToolCall, Usage,
};
use anyhow::{anyhow, bail, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Prompt tokens reported by every scripted response.
const PROMPT_TOKENS: u32 = 100;

/// One stream item.
#[derive(Debug, Clone)]
pub enum MockChunk {
    Content(String),
    ToolCall(ToolCall),
    /// Delivered as an `Err` item; the stream ends after it
    Error(String),
    /// Final chunk carrying usage and the stop reason
    Finished(String),
}

impl MockChunk {
    pub fn content(text: &str) -> Self {
        Self::Content(text.to_owned())
    }

    pub fn finished(stop_reason: &str) -> Self {
        Self::Finished(stop_reason.to_owned())
    }

    /// Native tool call with a fresh `mock_call_<n>` id.
    pub fn tool_call(tool: &str, args: serde_json::Value) -> Self {
        let n = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        Self::ToolCall(ToolCall {
            id: format!("mock_call_{n}"),
            tool: tool.to_owned(),
            args,
        })
    }

    pub fn error(message: &str) -> Self {
        Self::Error(message.to_owned())
    }

    fn text_len(&self) -> usize {
        match self {
            Self::Content(text) => text.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub chunks: Vec<MockChunk>,
    pub usage: Usage,
    /// `stream()` and `complete()` fail with this instead of returning
    pub start_error: Option<String>,
}

impl MockResponse {
    /// The whole text as one chunk.
    pub fn text(content: &str) -> Self {
        Self::streaming(vec![content])
    }

    /// One content chunk per entry, then a `stop` finish.
    pub fn streaming(pieces: Vec<&str>) -> Self {
        Self::from_chunks(pieces, MockChunk::finished("stop"))
    }

    /// Content chunks, then a transport error where the finish would be.
    pub fn interrupted(pieces: Vec<&str>, error: &str) -> Self {
        Self::from_chunks(pieces, MockChunk::error(error))
    }

    pub fn text_then_native_tool(text: &str, tool: &str, args: serde_json::Value) -> Self {
        Self::custom(
            vec![
                MockChunk::content(text),
                MockChunk::tool_call(tool, args),
                MockChunk::finished("tool_calls"),
            ],
            Usage::default(),
        )
        .with_estimated_usage()
    }

    /// Opening the stream fails; no chunks are produced.
    pub fn failed_start(error: &str) -> Self {
        Self {
            chunks: Vec::new(),
            usage: Usage::default(),
            start_error: Some(error.to_owned()),
        }
    }

    pub fn custom(chunks: Vec<MockChunk>, usage: Usage) -> Self {
        Self {
            chunks,
            usage,
            start_error: None,
        }
    }

    fn from_chunks(pieces: Vec<&str>, last: MockChunk) -> Self {
        let mut chunks: Vec<MockChunk> = pieces.into_iter().map(MockChunk::content).collect();
        chunks.push(last);
        Self::custom(chunks, Usage::default()).with_estimated_usage()
    }

    /// Roughly four bytes of content per completion token.
    fn with_estimated_usage(mut self) -> Self {
        let text_len: usize = self.chunks.iter().map(MockChunk::text_len).sum();
        let completion_tokens = (text_len / 4) as u32;
        self.usage = Usage {
            prompt_tokens: PROMPT_TOKENS,
            completion_tokens,
            total_tokens: PROMPT_TOKENS + completion_tokens,
        };
        self
    }

    fn into_chunk_results(self) -> Vec<Result<CompletionChunk>> {
        let usage = self.usage;
        self.chunks
            .into_iter()
            .map(|chunk| match chunk {
                MockChunk::Content(content) => Ok(CompletionChunk {
                    content,
                    ..Default::default()
                }),
                MockChunk::ToolCall(call) => Ok(CompletionChunk {
                    tool_calls: Some(vec![call]),
                    ..Default::default()
                }),
                MockChunk::Error(message) => Err(anyhow!(message)),
                MockChunk::Finished(stop_reason) => Ok(CompletionChunk {
                    finished: true,
                    usage: Some(usage.clone()),
                    stop_reason: Some(stop_reason),
                    ..Default::default()
                }),
            })
            .collect()
    }
}

/// Provider that replays scripted responses and records every request.
///
/// Once the queue is empty each call answers with a short placeholder text.
pub struct MockProvider {
    name: String,
    model: String,
    native_tool_calling: bool,
    script: Mutex<VecDeque<MockResponse>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_owned(),
            model: "mock-model".to_owned(),
            native_tool_calling: false,
            script: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    pub fn with_native_tool_calling(mut self, enabled: bool) -> Self {
        self.native_tool_calling = enabled;
        self
    }

    pub fn with_response(self, response: MockResponse) -> Self {
        self.with_responses(vec![response])
    }

    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        lock(&self.script).extend(responses);
        self
    }

    /// Handle on the recorded requests that stays valid after the provider
    /// is moved into a registry.
    pub fn request_log(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Record `request` and pop the response that answers it.
    fn answer(&self, request: CompletionRequest) -> Result<MockResponse> {
        lock(&self.requests).push(request);
        let response = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| MockResponse::text("(mock: script exhausted)"));
        match response.start_error {
            Some(error) => bail!(error),
            None => Ok(response),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LLMProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let response = self.answer(request)?;
        let content = response
            .chunks
            .iter()
            .filter_map(|chunk| match chunk {
                MockChunk::Content(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        Ok(CompletionResponse {
            content,
            usage: response.usage,
            model: self.model.clone(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let items = self.answer(request)?.into_chunk_results();
        let (tx, rx) = mpsc::channel(items.len().max(1));

        tokio::spawn(async move {
            for item in items {
                let last = item.is_err();
                if tx.send(item).await.is_err() || last {
                    break;
                }
                // Let the consumer observe each chunk separately
                tokio::task::yield_now().await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_native_tool_calling(&self) -> bool {
        self.native_tool_calling
    }

    fn max_tokens(&self) -> u32 {
        4096
    }

    fn temperature(&self) -> f32 {
        0.0
    }
}
