//! Execution phase: runs a finished queue of invocations.
//!
//! Invocations are dispatched concurrently and isolated from each other.
//! A missing tool, bad arguments, a handler error, a panic or a timeout
//! fails only the invocation it happened in. The phase returns once every
//! invocation has settled, with outcomes in queue order.

use crate::error::CoreError;
use crate::processor::{InvocationQueue, PendingInvocation};
use crate::renderer::{ProcessorEvent, Renderer};
use crate::tool_registry::{ExecContext, ToolRegistry};
use futures_util::future::join_all;
use futures_util::{stream, FutureExt, StreamExt};
use quill_config::AgentConfig;
use quill_providers::Message;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Concurrency and time limits for the execution phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPolicy {
    /// `None` or `Some(0)` runs every invocation at once
    pub max_concurrency: Option<usize>,
    pub timeout: Option<Duration>,
}

impl ExecutionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            max_concurrency: Some(config.max_concurrent_tools).filter(|&n| n > 0),
            timeout: Some(Duration::from_secs(config.tool_timeout_seconds))
                .filter(|limit| !limit.is_zero()),
        }
    }

    fn concurrency_limit(&self) -> Option<usize> {
        self.max_concurrency.filter(|&n| n > 0)
    }
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub invocation: PendingInvocation,
    pub result: Result<String, CoreError>,
    pub elapsed: Duration,
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The outcome as a message for the next model turn.
    pub fn to_message(&self) -> Message {
        let tool = &self.invocation.tool_name;
        let index = self.invocation.index;
        match &self.result {
            Ok(output) => Message::user(format!("Tool result ({} #{}):\n{}", tool, index, output)),
            Err(error) => Message::user(format!("Tool error ({} #{}): {}", tool, index, error)),
        }
    }
}

/// Run every queued invocation and wait for all of them to settle.
pub async fn execute_queue(
    queue: InvocationQueue,
    registry: &ToolRegistry,
    ctx: &ExecContext,
    policy: &ExecutionPolicy,
    renderer: Option<&dyn Renderer>,
) -> Vec<InvocationOutcome> {
    if queue.is_empty() {
        return Vec::new();
    }
    debug!(
        "Executing {} invocation(s), concurrency limit {:?}",
        queue.len(),
        policy.concurrency_limit()
    );

    let runs = queue
        .into_iter()
        .map(|invocation| run_invocation(invocation, registry, ctx, policy.timeout, renderer));

    match policy.concurrency_limit() {
        None => join_all(runs).await,
        // `buffered` keeps results in input order
        Some(limit) => stream::iter(runs).buffered(limit).collect().await,
    }
}

async fn run_invocation(
    invocation: PendingInvocation,
    registry: &ToolRegistry,
    ctx: &ExecContext,
    timeout: Option<Duration>,
    renderer: Option<&dyn Renderer>,
) -> InvocationOutcome {
    emit(
        renderer,
        ProcessorEvent::InvocationStarted {
            index: invocation.index,
            tool_name: invocation.tool_name.clone(),
        },
    );

    let started = Instant::now();
    let result = invoke(&invocation, registry, ctx, timeout).await;
    let elapsed = started.elapsed();

    match &result {
        Ok(_) => debug!(
            "Invocation #{} of '{}' succeeded in {:?}",
            invocation.index, invocation.tool_name, elapsed
        ),
        Err(error) => warn!(
            "Invocation #{} of '{}' failed: {}",
            invocation.index, invocation.tool_name, error
        ),
    }

    emit(
        renderer,
        ProcessorEvent::InvocationSettled {
            index: invocation.index,
            tool_name: invocation.tool_name.clone(),
            elapsed,
            status: (&result).into(),
        },
    );

    InvocationOutcome {
        invocation,
        result,
        elapsed,
    }
}

async fn invoke(
    invocation: &PendingInvocation,
    registry: &ToolRegistry,
    ctx: &ExecContext,
    timeout: Option<Duration>,
) -> Result<String, CoreError> {
    let tool = invocation.tool_name.clone();
    let descriptor = registry
        .get(&tool)
        .ok_or_else(|| CoreError::UnknownTool { name: tool.clone() })?;
    descriptor.validate_args(&invocation.args)?;

    let call = AssertUnwindSafe(descriptor.handler.call(invocation.args.clone(), ctx)).catch_unwind();
    let settled = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CoreError::Timeout {
                tool: tool.clone(),
                after: limit,
            })?,
        None => call.await,
    };

    match settled {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(error)) => Err(CoreError::Handler {
            tool,
            message: format!("{:#}", error),
        }),
        Err(panic) => Err(CoreError::Handler {
            tool,
            message: format!("handler panicked: {}", panic_message(panic.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn emit(renderer: Option<&dyn Renderer>, event: ProcessorEvent) {
    if let Some(renderer) = renderer {
        renderer.on_event(&event);
    }
}
