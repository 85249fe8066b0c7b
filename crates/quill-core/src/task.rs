//! One user request: prompt, context files and the tools on offer.

use crate::context::File;
use crate::directive::{self, Sentinels};
use crate::error::CoreError;
use crate::processor::ToolCallProcessor;
use crate::prompts::{BASE_INSTRUCTIONS, CONTEXT_HEADER, TOOLS_HEADER};
use crate::tool_registry::{ToolDescriptor, ToolRegistry};
use quill_providers::Message;
use uuid::Uuid;

/// A task is built per turn and owns the processor that scans the model's
/// reply to it.
#[derive(Debug)]
pub struct Task {
    id: Uuid,
    prompt: String,
    context: Vec<File>,
    tools: ToolRegistry,
    processor: ToolCallProcessor,
    /// Replies and tool results that followed the task text, oldest first
    exchanges: Vec<Message>,
}

impl Task {
    /// Build a task with the default directive sentinels. No I/O happens
    /// here; the only failure is a duplicate tool name.
    pub fn new(
        prompt: impl Into<String>,
        context: Vec<File>,
        tools: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<Self, CoreError> {
        Self::with_sentinels(prompt, context, tools, Sentinels::default())
    }

    pub fn with_sentinels(
        prompt: impl Into<String>,
        context: Vec<File>,
        tools: impl IntoIterator<Item = ToolDescriptor>,
        sentinels: Sentinels,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            context,
            tools: ToolRegistry::from_descriptors(tools)?,
            processor: ToolCallProcessor::new(sentinels),
            exchanges: Vec::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn context(&self) -> &[File] {
        &self.context
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn processor(&self) -> &ToolCallProcessor {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut ToolCallProcessor {
        &mut self.processor
    }

    /// Split borrow for the driver: the processor mutably, the tools shared.
    pub(crate) fn processor_and_tools(&mut self) -> (&mut ToolCallProcessor, &ToolRegistry) {
        (&mut self.processor, &self.tools)
    }

    /// System message text. Identical inputs give byte-identical output.
    pub fn system_text(&self) -> String {
        let mut text = String::from(BASE_INSTRUCTIONS);

        text.push_str("\n\n");
        text.push_str(TOOLS_HEADER);
        text.push_str("\n\n");
        if self.tools.is_empty() {
            text.push_str("No tools are available for this task.\n");
        } else {
            text.push_str(&directive::format_instructions(self.processor.sentinels()));
            text.push_str("\n\nAvailable tools:\n\n");
            for tool in self.tools.iter() {
                text.push_str(&format!("- `{}`: {}\n", tool.name, tool.description));
                let schema = serde_json::to_string(&tool.input_schema).unwrap_or_default();
                text.push_str(&format!("  Arguments schema: {}\n", schema));
            }
        }

        if !self.context.is_empty() {
            text.push('\n');
            text.push_str(CONTEXT_HEADER);
            text.push('\n');
            for file in &self.context {
                text.push('\n');
                render_file(&mut text, file);
            }
        }

        text
    }

    /// User message text for the prompt.
    pub fn user_text(&self) -> String {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            "Task: (no instructions)".to_string()
        } else {
            format!("Task: {}", prompt)
        }
    }

    /// The request for the next turn: system text, caller history, the task
    /// text, then any exchanges recorded so far.
    pub fn messages(&self, history: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + self.exchanges.len() + 2);
        messages.push(Message::system(self.system_text()));
        messages.extend_from_slice(history);
        messages.push(Message::user(self.user_text()));
        messages.extend_from_slice(&self.exchanges);
        messages
    }

    /// Append a reply and its tool results, sent with every later turn.
    pub fn record_exchange(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.exchanges.extend(messages);
    }

    /// The task text followed by every recorded exchange, for a caller that
    /// keeps conversation history across tasks.
    pub fn transcript(&self) -> Vec<Message> {
        std::iter::once(Message::user(self.user_text()))
            .chain(self.exchanges.iter().cloned())
            .collect()
    }
}

fn render_file(text: &mut String, file: &File) {
    let path = file.path().display();
    match file.content() {
        Some(content) => {
            let fence = "`".repeat(longest_backtick_run(content).max(2) + 1);
            text.push_str(&format!("## {} ({} bytes)\n", path, file.size()));
            text.push_str(&fence);
            text.push('\n');
            text.push_str(content);
            if !content.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&fence);
            text.push('\n');
        }
        None => {
            text.push_str(&format!(
                "## {} ({} bytes, content not included)\n",
                path,
                file.size()
            ));
        }
    }
}

fn longest_backtick_run(content: &str) -> usize {
    content
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0)
}
