use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the tool-call pipeline.
///
/// Parse and per-invocation failures are recovered locally and reported
/// through renderer events and invocation outcomes. Only the variants for
/// which [`CoreError::is_fatal`] returns true abort a task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("malformed tool directive: {reason}")]
    Parse { reason: String },

    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool '{tool}' failed: {message}")]
    Handler { tool: String, message: String },

    #[error("tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("duplicate tool name '{0}'")]
    DuplicateTool(String),

    #[error("invalid directive sentinels: {0}")]
    InvalidSentinels(String),
}

impl CoreError {
    /// True for errors that end the whole task rather than one invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Provider(_)
                | Self::DuplicateTool(_)
                | Self::InvalidSentinels(_)
        )
    }

    /// Name of the tool an invocation-level error belongs to, if any.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::UnknownTool { name } => Some(name),
            Self::InvalidArguments { tool, .. }
            | Self::Handler { tool, .. }
            | Self::Timeout { tool, .. } => Some(tool),
            _ => None,
        }
    }
}
