//! Model transport for Quill.
//!
//! Every backend implements [`LLMProvider`]; the driver only ever sees the
//! trait and a [`CompletionStream`] of chunks. [`ProviderRegistry`] maps
//! `<type>.<name>` references from the config to live providers.

mod streaming;
pub mod mock;
pub mod openai;

pub use mock::{MockChunk, MockProvider, MockResponse};
pub use openai::OpenAIProvider;
pub use streaming::{decode_utf8_streaming, make_final_chunk, make_text_chunk};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A provider endpoint answered with a non-success HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("{provider} returned HTTP {status}: {detail}")]
pub struct ApiError {
    pub provider: String,
    pub status: u16,
    pub detail: String,
}

#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync {
    /// One-shot, non-streaming completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Start a streamed completion.
    ///
    /// The returned stream is finite and cannot be restarted. A chunk with
    /// `finished == true` marks the end of the response; an `Err` item is a
    /// transport failure and ends the stream.
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream>;

    /// Registry key, e.g. `openai.default`
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Whether `CompletionRequest::tools` is honoured and tool calls come
    /// back in `CompletionChunk::tool_calls`.
    fn has_native_tool_calling(&self) -> bool {
        false
    }

    fn max_tokens(&self) -> u32;

    fn temperature(&self) -> f32;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
    /// Tool definitions for providers with native tool calling
    pub tools: Option<Vec<Tool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    pub fn new(role: MessageRole, content: String) -> Self {
        Self { role, content }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Usage,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

pub type CompletionStream = tokio_stream::wrappers::ReceiverStream<Result<CompletionChunk>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub content: String,
    pub finished: bool,
    /// Tool calls delivered through the provider's native channel
    pub tool_calls: Option<Vec<ToolCall>>,
    pub usage: Option<Usage>,
    /// Stop reason from the API (e.g., "stop", "length", "tool_calls")
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    pub args: serde_json::Value,
}

/// Wire description of a tool for native tool calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Named providers plus the one used when no name is given.
///
/// The first registered provider is the default until `set_default` says
/// otherwise.
pub struct ProviderRegistry {
    by_name: HashMap<String, Box<dyn LLMProvider>>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            default_name: None,
        }
    }

    /// Add `provider` under its own name, replacing any provider of that name.
    pub fn register<P: LLMProvider + 'static>(&mut self, provider: P) {
        let name = provider.name().to_string();
        self.default_name.get_or_insert_with(|| name.clone());
        self.by_name.insert(name, Box::new(provider));
    }

    pub fn set_default(&mut self, provider_name: &str) -> Result<()> {
        anyhow::ensure!(
            self.by_name.contains_key(provider_name),
            "Cannot make '{}' the default: no such provider (registered: {:?})",
            provider_name,
            self.list_providers()
        );
        self.default_name = Some(provider_name.to_string());
        Ok(())
    }

    /// The named provider, or the default for `None`.
    pub fn get(&self, provider_name: Option<&str>) -> Result<&dyn LLMProvider> {
        let name = match provider_name.or(self.default_name.as_deref()) {
            Some(name) => name,
            None => anyhow::bail!("No providers are registered"),
        };
        match self.by_name.get(name) {
            Some(provider) => Ok(provider.as_ref()),
            None => anyhow::bail!("Provider '{}' not found", name),
        }
    }

    pub fn list_providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
