//! Interactive mode for the Quill CLI.

use anyhow::Result;
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use quill_core::{builtin_tools, Driver, File, Task};
use quill_providers::Message;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::error;

use crate::task_execution::{build_task, execute_task, handle_execution_error};

/// A line that starts with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Clear,
    Context,
    Tools,
    Unknown(String),
}

impl Command {
    /// `None` when `input` is a task rather than a command.
    pub fn parse(input: &str) -> Option<Self> {
        let name = input.strip_prefix('/')?.split_whitespace().next().unwrap_or_default();
        Some(match name {
            "exit" | "quit" => Self::Exit,
            "clear" => Self::Clear,
            "context" => Self::Context,
            "tools" => Self::Tools,
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// Conversation carried between tasks: each task's text followed by the
/// replies and tool results of all its turns.
#[derive(Debug, Default)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn record_task(&mut self, task: &Task) {
        self.messages.extend(task.transcript());
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Run interactive mode with console output.
pub async fn run_interactive(driver: &Driver, context: &[File], show_prompt: bool) -> Result<()> {
    println!();
    println!("quill coding assistant");
    println!("      >> type a task, or /exit to leave");
    println!();

    match driver.provider() {
        Ok(provider) => println!(
            "🔧 {}{}{} | {}{}{}",
            SetForegroundColor(Color::Cyan),
            provider.name(),
            ResetColor,
            SetForegroundColor(Color::Yellow),
            provider.model(),
            ResetColor
        ),
        Err(e) => error!("Failed to get provider info: {}", e),
    }
    println!("📁 {}", driver.exec_context().working_dir.display());
    if !context.is_empty() {
        println!("📄 {} context file(s) loaded", context.len());
    }
    println!();

    let mut rl = DefaultEditor::new()?;
    let history_file = dirs::home_dir().map(|mut path| {
        path.push(".quill_history");
        path
    });
    if let Some(ref history_path) = history_file {
        let _ = rl.load_history(history_path);
    }

    let mut history = History::default();

    loop {
        let input = match rl.readline("quill> ") {
            Ok(line) => line.trim().to_string(),
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                error!("Error: {:?}", err);
                break;
            }
        };

        if input.is_empty() {
            continue;
        }
        rl.add_history_entry(&input)?;

        if let Some(command) = Command::parse(&input) {
            match command {
                Command::Exit => break,
                Command::Clear => {
                    history.clear();
                    println!("Conversation cleared.");
                }
                Command::Context => print_context(context),
                Command::Tools => print_tools(),
                Command::Unknown(name) => {
                    println!("Unknown command '/{}'. Try /context, /tools, /clear or /exit.", name)
                }
            }
            continue;
        }

        let mut task = match build_task(&input, context) {
            Ok(task) => task,
            Err(e) => {
                handle_execution_error(&e, &input);
                continue;
            }
        };
        match execute_task(driver, &mut task, history.messages(), show_prompt).await {
            Ok(_) => history.record_task(&task),
            Err(e) => handle_execution_error(&e, &input),
        }
    }

    if let Some(ref history_path) = history_file {
        let _ = rl.save_history(history_path);
    }

    println!("👋 Goodbye!");
    Ok(())
}

fn print_context(context: &[File]) {
    if context.is_empty() {
        println!("No context files. Pass them with --file <PATTERN>.");
        return;
    }
    for file in context {
        println!("  {} ({} bytes)", file.path().display(), file.size());
    }
}

fn print_tools() {
    for tool in builtin_tools() {
        println!("  {}: {}", tool.name, tool.description);
    }
}
