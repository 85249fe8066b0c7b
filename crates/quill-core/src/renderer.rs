//! Observer interface for live progress of a task.
//!
//! A renderer is attached to a task's processor for the duration of one turn
//! and receives every [`ProcessorEvent`] in emission order. `cleanup()` is
//! called exactly once when it is detached.

use crate::error::CoreError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    /// Plain model text, safe to display as-is
    Content(String),
    InvocationQueued {
        index: usize,
        tool_name: String,
    },
    /// A directive could not be parsed; its raw text follows as `Content`
    ParseError {
        raw: String,
        reason: String,
    },
    InvocationStarted {
        index: usize,
        tool_name: String,
    },
    InvocationSettled {
        index: usize,
        tool_name: String,
        elapsed: Duration,
        status: InvocationStatus,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationStatus {
    Succeeded(String),
    Failed(CoreError),
}

impl InvocationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

impl From<&Result<String, CoreError>> for InvocationStatus {
    fn from(result: &Result<String, CoreError>) -> Self {
        match result {
            Ok(output) => Self::Succeeded(output.clone()),
            Err(error) => Self::Failed(error.clone()),
        }
    }
}

pub trait Renderer: Send + Sync {
    fn on_event(&self, event: &ProcessorEvent);

    /// Release whatever the renderer holds (terminal state, open lines).
    fn cleanup(&self) {}
}

/// Renderer that discards everything.
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn on_event(&self, _event: &ProcessorEvent) {}
}

/// Records every event, for tests and non-interactive callers.
#[derive(Debug, Default)]
pub struct CollectingRenderer {
    events: Mutex<Vec<ProcessorEvent>>,
    cleanups: AtomicUsize,
}

impl CollectingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProcessorEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// All `Content` events concatenated.
    pub fn content(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProcessorEvent::Content(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn settled_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ProcessorEvent::InvocationSettled { .. }))
            .count()
    }
}

impl Renderer for CollectingRenderer {
    fn on_event(&self, event: &ProcessorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
