//! The streaming tool-call pipeline.
//!
//! A [`Task`] binds a prompt, context files and a tool registry. The
//! [`Driver`] streams the model's reply through the task's
//! [`ToolCallProcessor`], which forwards text to a [`Renderer`] and queues
//! the tool directives it finds; once the stream ends the queue is run by
//! [`execute_queue`] with per-invocation isolation.

pub mod context;
pub mod directive;
pub mod driver;
pub mod error;
pub mod error_handling;
pub mod execution;
pub mod processor;
mod prompts;
pub mod renderer;
pub mod task;
pub mod tool_registry;
pub mod tools;

pub use context::File;
pub use directive::{ParsedDirective, Sentinels};
pub use driver::{Driver, TurnResult, DEFAULT_MAX_FOLLOW_UPS};
pub use error::CoreError;
pub use execution::{execute_queue, ExecutionPolicy, InvocationOutcome};
pub use processor::{InvocationQueue, PendingInvocation, ProcessorMode, ToolCallProcessor};
pub use renderer::{
    CollectingRenderer, InvocationStatus, NullRenderer, ProcessorEvent, Renderer,
};
pub use task::Task;
pub use tool_registry::{ExecContext, FnHandler, ToolDescriptor, ToolHandler, ToolRegistry};
pub use tools::builtin_tools;
