//! Drives one turn: stream the model's reply through the task's processor,
//! then run the queued invocations.

use crate::error::CoreError;
use crate::error_handling::{retry_with_backoff, RetryPolicy};
use crate::execution::{execute_queue, ExecutionPolicy, InvocationOutcome};
use crate::renderer::Renderer;
use crate::task::Task;
use crate::tool_registry::ExecContext;
use quill_config::Config;
use quill_providers::{CompletionRequest, LLMProvider, Message, ProviderRegistry, Usage};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Follow-up turns after the first when nothing else is configured.
pub const DEFAULT_MAX_FOLLOW_UPS: usize = 10;

/// What a turn produced.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    /// The model's full text reply, directives included
    pub response: String,
    /// One outcome per queued invocation, in queue order
    pub outcomes: Vec<InvocationOutcome>,
    pub usage: Option<Usage>,
    /// The turn was cancelled before the stream ended; nothing was executed
    pub cancelled: bool,
}

impl TurnResult {
    pub fn assistant_message(&self) -> Message {
        Message::assistant(self.response.clone())
    }

    /// One user message per settled invocation, in queue order.
    pub fn follow_up_messages(&self) -> Vec<Message> {
        self.outcomes.iter().map(InvocationOutcome::to_message).collect()
    }

    /// The reply (when there is one) followed by the tool results.
    pub fn exchange_messages(&self) -> Vec<Message> {
        let reply = (!self.response.is_empty()).then(|| self.assistant_message());
        reply.into_iter().chain(self.follow_up_messages()).collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

enum StreamEnd {
    Completed,
    Cancelled,
    Failed(anyhow::Error),
}

pub struct Driver {
    providers: ProviderRegistry,
    provider_name: Option<String>,
    retry: RetryPolicy,
    policy: ExecutionPolicy,
    exec_ctx: ExecContext,
    native_tool_calling: bool,
    max_follow_ups: usize,
}

impl Driver {
    pub fn new(providers: ProviderRegistry, exec_ctx: ExecContext) -> Self {
        Self {
            providers,
            provider_name: None,
            retry: RetryPolicy::default(),
            policy: ExecutionPolicy::unbounded(),
            exec_ctx,
            native_tool_calling: false,
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
        }
    }

    /// Driver with retry, execution and tool-channel settings from `[agent]`.
    pub fn from_config(providers: ProviderRegistry, config: &Config, exec_ctx: ExecContext) -> Self {
        Self::new(providers, exec_ctx)
            .with_retry_policy(RetryPolicy::with_retries(config.agent.max_retry_attempts))
            .with_execution_policy(ExecutionPolicy::from_agent_config(&config.agent))
            .with_native_tool_calling(config.agent.native_tool_calling)
            .with_max_follow_ups(config.agent.max_follow_up_turns)
    }

    pub fn with_provider(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_native_tool_calling(mut self, enabled: bool) -> Self {
        self.native_tool_calling = enabled;
        self
    }

    /// Cap on the turns `run_task` adds after the first; 0 runs a single turn.
    pub fn with_max_follow_ups(mut self, max_follow_ups: usize) -> Self {
        self.max_follow_ups = max_follow_ups;
        self
    }

    pub fn execution_policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn exec_context(&self) -> &ExecContext {
        &self.exec_ctx
    }

    pub fn provider(&self) -> Result<&dyn LLMProvider, CoreError> {
        self.providers
            .get(self.provider_name.as_deref())
            .map_err(|e| CoreError::Provider(e.to_string()))
    }

    /// Run one turn of `task`.
    ///
    /// `renderer` is attached to the task's processor for the whole turn and
    /// detached (with its `cleanup()`) on every return path.
    pub async fn run_turn(
        &self,
        task: &mut Task,
        renderer: Arc<dyn Renderer>,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<TurnResult, CoreError> {
        task.processor_mut().attach(renderer);
        let result = self.drive(task, history, cancel).await;
        task.processor_mut().detach();
        result
    }

    /// Run `task` until a turn queues no invocations.
    ///
    /// After each turn its reply and tool results are recorded on the task,
    /// so the next request carries them. Stops early on cancellation or after
    /// the follow-up cap; a fatal error ends the task. `renderer` stays
    /// attached across all turns and is cleaned up once.
    pub async fn run_task(
        &self,
        task: &mut Task,
        renderer: Arc<dyn Renderer>,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Vec<TurnResult>, CoreError> {
        task.processor_mut().attach(renderer);
        let result = self.drive_until_done(task, history, cancel).await;
        task.processor_mut().detach();
        result
    }

    async fn drive_until_done(
        &self,
        task: &mut Task,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Vec<TurnResult>, CoreError> {
        let mut turns = Vec::new();
        loop {
            let turn = self.drive(task, history, cancel).await?;
            task.record_exchange(turn.exchange_messages());
            let wants_more = !turn.cancelled && !turn.outcomes.is_empty();
            turns.push(turn);

            if !wants_more {
                break;
            }
            if turns.len() > self.max_follow_ups {
                warn!(
                    "Stopping task {} after {} follow-up turn(s); last tool results were not sent",
                    task.id(),
                    self.max_follow_ups
                );
                break;
            }
            debug!("Sending tool results back for turn {}", turns.len() + 1);
        }
        Ok(turns)
    }

    async fn drive(
        &self,
        task: &mut Task,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<TurnResult, CoreError> {
        let provider = self.provider()?;
        let tools = (self.native_tool_calling
            && provider.has_native_tool_calling()
            && !task.tools().is_empty())
        .then(|| task.tools().definitions());
        let request = CompletionRequest {
            messages: task.messages(history),
            max_tokens: Some(provider.max_tokens()),
            temperature: Some(provider.temperature()),
            stream: true,
            tools,
        };
        info!(
            "Starting turn {} with {} ({} messages)",
            task.id(),
            provider.name(),
            request.messages.len()
        );

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = retry_with_backoff("stream", || provider.stream(request.clone()), &self.retry) => Some(result),
        };
        let mut stream = match started {
            None => {
                info!("Turn cancelled before the stream started");
                task.processor_mut().finish();
                return Ok(TurnResult {
                    cancelled: true,
                    ..Default::default()
                });
            }
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                error!("Failed to start stream: {:#}", e);
                return Err(CoreError::Transport(format!("{:#}", e)));
            }
        };

        let (processor, registry) = task.processor_and_tools();
        let mut response = String::new();
        let mut usage = None;
        let mut chunks = 0usize;

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                item = stream.next() => match item {
                    None => break StreamEnd::Completed,
                    Some(Err(e)) => break StreamEnd::Failed(e),
                    Some(Ok(chunk)) => {
                        chunks += 1;
                        if !chunk.content.is_empty() {
                            response.push_str(&chunk.content);
                            processor.process(&chunk.content);
                        }
                        for call in chunk.tool_calls.unwrap_or_default() {
                            processor.enqueue_native(call.tool, call.args);
                        }
                        if chunk.usage.is_some() {
                            usage = chunk.usage;
                        }
                        if chunk.finished {
                            break StreamEnd::Completed;
                        }
                    }
                },
            }
        };
        debug!("Stream ended after {} chunk(s)", chunks);

        let queue = processor.finish();
        match end {
            StreamEnd::Completed => {}
            StreamEnd::Cancelled => {
                if !queue.is_empty() {
                    warn!(
                        "Turn cancelled; discarding {} queued invocation(s)",
                        queue.len()
                    );
                }
                return Ok(TurnResult {
                    response,
                    outcomes: Vec::new(),
                    usage,
                    cancelled: true,
                });
            }
            StreamEnd::Failed(e) => {
                error!("Stream failed after {} chunk(s): {:#}", chunks, e);
                return Err(CoreError::Transport(format!("{:#}", e)));
            }
        }

        let renderer = processor.renderer();
        let outcomes = execute_queue(
            queue,
            registry,
            &self.exec_ctx,
            &self.policy,
            renderer.as_deref(),
        )
        .await;

        Ok(TurnResult {
            response,
            outcomes,
            usage,
            cancelled: false,
        })
    }
}
