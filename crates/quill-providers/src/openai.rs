//! OpenAI-compatible chat-completions provider.
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` endpoint (OpenRouter, Groq, local gateways).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::streaming::{decode_utf8_streaming, next_sse_data};
use crate::{
    make_final_chunk, make_text_chunk, ApiError, CompletionChunk, CompletionRequest, CompletionResponse,
    CompletionStream, LLMProvider, Message, MessageRole, Tool, ToolCall, Usage,
};

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 16_000;
const DEFAULT_TEMPERATURE: f32 = 0.1;

/// How far past the last known tool-call slot a fragment's `index` may point.
const MAX_SLOT_GAP: usize = 64;

type ChunkSender = mpsc::Sender<Result<CompletionChunk>>;

#[derive(Clone)]
pub struct OpenAIProvider {
    name: String,
    http: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAIProvider {
    /// Provider registered as `name`, talking to api.openai.com with the
    /// default model until overridden.
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            http: Client::new(),
            api_key: api_key.into(),
            endpoint: chat_endpoint(DEFAULT_BASE_URL),
            model: DEFAULT_MODEL.to_owned(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// `base_url` is the API root, e.g. `http://localhost:11434/v1`.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.endpoint = chat_endpoint(base_url);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
            "stream": stream,
        });

        if let Some(limit) = request.max_tokens.or(self.max_tokens) {
            body["max_completion_tokens"] = json!(limit);
        }
        if let Some(temperature) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temperature);
        }
        match request.tools.as_deref() {
            Some(tools) if !tools.is_empty() => {
                body["tools"] = tools.iter().map(tool_json).collect();
            }
            _ => {}
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }

    /// POST `body`; a non-2xx status becomes an [`ApiError`].
    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(ApiError {
            provider: self.name.clone(),
            status: status.as_u16(),
            detail,
        }
        .into())
    }
}

fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn message_json(message: &Message) -> Value {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };
    json!({ "role": role, "content": message.content })
}

fn tool_json(tool: &Tool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// Everything gathered from one SSE body besides the text deltas, which are
/// forwarded as soon as they arrive.
#[derive(Default)]
struct StreamState {
    pending_calls: Vec<PartialCall>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

impl StreamState {
    /// Apply one `data:` payload. Returns `false` once the receiver is gone.
    async fn apply(&mut self, event: wire::StreamEvent, tx: &ChunkSender) -> bool {
        for choice in event.choices {
            if choice.finish_reason.is_some() {
                self.stop_reason = choice.finish_reason;
            }
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                if tx.send(Ok(make_text_chunk(text))).await.is_err() {
                    return false;
                }
            }
            for fragment in choice.delta.tool_calls.into_iter().flatten() {
                self.merge_call(fragment);
            }
        }
        if let Some(usage) = event.usage {
            self.usage = Some(usage.into());
        }
        true
    }

    fn merge_call(&mut self, fragment: wire::ToolCallFragment) {
        let slot = fragment
            .index
            .unwrap_or_else(|| self.pending_calls.len().saturating_sub(1));
        if slot > self.pending_calls.len() + MAX_SLOT_GAP {
            warn!(
                "Dropping tool-call fragment with index {} ({} call(s) so far)",
                slot,
                self.pending_calls.len()
            );
            return;
        }
        if self.pending_calls.len() <= slot {
            self.pending_calls.resize_with(slot + 1, PartialCall::default);
        }
        let call = &mut self.pending_calls[slot];
        if fragment.id.is_some() {
            call.id = fragment.id;
        }
        if let Some(function) = fragment.function {
            if function.name.is_some() {
                call.name = function.name;
            }
            call.arguments.push_str(function.arguments.as_deref().unwrap_or_default());
        }
    }

    fn finish(self) -> CompletionChunk {
        let calls = self.pending_calls.iter().filter_map(PartialCall::complete).collect();
        let mut last = make_final_chunk(calls, self.usage);
        last.stop_reason = self.stop_reason;
        last
    }
}

/// Native tool call whose arguments are still arriving in pieces.
#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialCall {
    fn complete(&self) -> Option<ToolCall> {
        let tool = self.name.clone()?;
        let args = match self.arguments.trim() {
            "" => json!({}),
            raw => serde_json::from_str(raw).unwrap_or(Value::Null),
        };
        Some(ToolCall {
            id: self.id.clone().unwrap_or_default(),
            tool,
            args,
        })
    }
}

/// Turn an SSE byte stream into completion chunks. Ends on `[DONE]`, at end
/// of body, or with an `Err` item on a read failure.
async fn pump_events(mut body: impl Stream<Item = reqwest::Result<Bytes>> + Unpin, tx: ChunkSender) {
    let mut raw: Vec<u8> = Vec::new();
    let mut lines = String::new();
    let mut state = StreamState::default();

    while let Some(read) = body.next().await {
        match read {
            Ok(bytes) => raw.extend_from_slice(&bytes),
            Err(e) => {
                warn!("Reading response body failed: {}", e);
                let _ = tx.send(Err(anyhow!("stream read failed: {}", e))).await;
                return;
            }
        }
        if let Some(text) = decode_utf8_streaming(&mut raw) {
            lines.push_str(&text);
        }

        while let Some(entry) = next_sse_data(&mut lines) {
            let Some(data) = entry else { continue };
            if data == "[DONE]" {
                let _ = tx.send(Ok(state.finish())).await;
                return;
            }
            match serde_json::from_str::<wire::StreamEvent>(&data) {
                Ok(event) => {
                    if !state.apply(event, &tx).await {
                        debug!("Stream consumer went away");
                        return;
                    }
                }
                Err(e) => debug!("Skipping unparseable event ({}): {}", e, data),
            }
        }
    }

    debug!("Body ended without [DONE]");
    let _ = tx.send(Ok(state.finish())).await;
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.request_body(&request, false);
        let reply: wire::Reply = self.send(&body).await?.json().await?;

        let content = reply
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            usage: reply.usage.into(),
            model: self.model.clone(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        debug!(
            "{}: streaming {} message(s) to {}",
            self.name,
            request.messages.len(),
            self.model
        );
        let body = self.request_body(&request, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_events(response.bytes_stream(), tx));
        Ok(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_native_tool_calling(&self) -> bool {
        true
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Response shapes of the chat-completions API.
mod wire {
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Reply {
        pub choices: Vec<ReplyChoice>,
        pub usage: TokenCounts,
    }

    #[derive(Deserialize)]
    pub struct ReplyChoice {
        pub message: ReplyMessage,
    }

    #[derive(Deserialize)]
    pub struct ReplyMessage {
        pub content: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct TokenCounts {
        pub prompt_tokens: u32,
        pub completion_tokens: u32,
        pub total_tokens: u32,
    }

    impl From<TokenCounts> for crate::Usage {
        fn from(t: TokenCounts) -> Self {
            Self {
                prompt_tokens: t.prompt_tokens,
                completion_tokens: t.completion_tokens,
                total_tokens: t.total_tokens,
            }
        }
    }

    #[derive(Deserialize)]
    pub struct StreamEvent {
        #[serde(default)]
        pub choices: Vec<EventChoice>,
        pub usage: Option<TokenCounts>,
    }

    #[derive(Deserialize)]
    pub struct EventChoice {
        pub delta: Delta,
        pub finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct Delta {
        pub content: Option<String>,
        pub tool_calls: Option<Vec<ToolCallFragment>>,
    }

    #[derive(Deserialize)]
    pub struct ToolCallFragment {
        pub index: Option<usize>,
        pub id: Option<String>,
        pub function: Option<FunctionFragment>,
    }

    #[derive(Deserialize)]
    pub struct FunctionFragment {
        pub name: Option<String>,
        pub arguments: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> OpenAIProvider {
        OpenAIProvider::new("openai_compatible.local", "sk-test")
            .with_model("gpt-test")
            .with_base_url("http://localhost:1234/v1/")
            .with_max_tokens(Some(512))
    }

    fn fragment(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> wire::ToolCallFragment {
        wire::ToolCallFragment {
            index: Some(index),
            id: id.map(str::to_owned),
            function: Some(wire::FunctionFragment {
                name: name.map(str::to_owned),
                arguments: Some(args.to_owned()),
            }),
        }
    }

    async fn pump(parts: Vec<&str>) -> Vec<CompletionChunk> {
        let parts: Vec<reqwest::Result<Bytes>> =
            parts.into_iter().map(|p| Ok(Bytes::from(p.to_owned()))).collect();
        let (tx, mut rx) = mpsc::channel(32);
        pump_events(futures_util::stream::iter(parts), tx).await;

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk.unwrap());
        }
        out
    }

    #[test]
    fn test_endpoint_ignores_trailing_slash() {
        assert_eq!(local().endpoint, "http://localhost:1234/v1/chat/completions");
        assert_eq!(
            OpenAIProvider::new("openai.default", "k").endpoint,
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let request = CompletionRequest {
            messages: vec![Message::system("rules"), Message::user("Task: hi")],
            max_tokens: None,
            temperature: Some(0.2),
            stream: true,
            tools: Some(vec![Tool {
                name: "shell".to_owned(),
                description: "Run a command".to_owned(),
                input_schema: json!({"type": "object"}),
            }]),
        };

        let body = local().request_body(&request, true);
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["max_completion_tokens"], 512);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Task: hi");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "shell");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_empty_tool_list_is_omitted() {
        let request = CompletionRequest {
            messages: vec![],
            max_tokens: None,
            temperature: None,
            stream: false,
            tools: Some(vec![]),
        };
        let body = local().request_body(&request, false);
        assert!(body.get("tools").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_argument_fragments_merge_per_index() {
        let mut state = StreamState::default();
        state.merge_call(fragment(0, Some("call_a"), Some("write_file"), "{\"path\":"));
        state.merge_call(fragment(1, Some("call_b"), Some("shell"), ""));
        state.merge_call(fragment(0, None, None, "\"a.txt\"}"));

        let last = state.finish();
        let calls = last.tool_calls.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].args["path"], "a.txt");
        assert_eq!(calls[1].tool, "shell");
        assert_eq!(calls[1].args, json!({}));
    }

    #[test]
    fn test_far_out_index_is_ignored() {
        let mut state = StreamState::default();
        state.merge_call(fragment(0, Some("call_a"), Some("shell"), "{}"));
        state.merge_call(fragment(4_000_000_000, Some("call_x"), Some("shell"), "{}"));

        assert_eq!(state.pending_calls.len(), 1);
        assert_eq!(state.finish().tool_calls.unwrap()[0].id, "call_a");
    }

    #[tokio::test]
    async fn test_text_deltas_then_final_chunk() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        );
        // Split inside the first event
        let (a, b) = body.split_at(37);
        let chunks = pump(vec![a, b]).await;

        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "Hello");
        let last = chunks.last().unwrap();
        assert!(last.finished);
        assert_eq!(last.stop_reason.as_deref(), Some("stop"));
        assert_eq!(last.usage.as_ref().unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn test_invalid_byte_does_not_cut_the_stream() {
        let mut first = b"data: {\"choices\":[{\"delta\":{\"content\":\"a".to_vec();
        first.push(0xFF);
        first.extend_from_slice(b"b\"},\"finish_reason\":null}]}\n\n");
        let parts: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from(first)),
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"c\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
            )),
        ];
        let (tx, mut rx) = mpsc::channel(32);
        pump_events(futures_util::stream::iter(parts), tx).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "a\u{FFFD}bc");
        assert_eq!(chunks.last().unwrap().stop_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_missing_done_still_finishes() {
        let chunks = pump(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"},\"finish_reason\":\"length\"}]}\n\n",
        ])
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "partial");
        assert!(chunks[1].finished);
        assert_eq!(chunks[1].stop_reason.as_deref(), Some("length"));
    }
}
