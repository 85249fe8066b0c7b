//! Running one task from the CLI, with Ctrl+C wired to cancellation.

use quill_core::{builtin_tools, CoreError, Driver, File, Task, TurnResult};
use quill_providers::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::console_renderer::ConsoleRenderer;

/// A fresh task for `prompt` with the built-in tools.
pub fn build_task(prompt: &str, context: &[File]) -> Result<Task, CoreError> {
    Task::new(prompt, context.to_vec(), builtin_tools())
}

/// Run `task` until the model stops calling tools, printing progress as it
/// streams.
///
/// Ctrl+C while a turn is running cancels the task.
pub async fn execute_task(
    driver: &Driver,
    task: &mut Task,
    history: &[Message],
    show_prompt: bool,
) -> Result<Vec<TurnResult>, CoreError> {
    if show_prompt {
        println!("🔍 System Prompt:");
        println!("================");
        println!("{}", task.system_text());
        println!("================");
        println!();
    }

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Ctrl+C received, cancelling task");
                cancel.cancel();
            }
        })
    };

    let renderer = Arc::new(ConsoleRenderer::new());
    let result = driver.run_task(task, renderer, history, &cancel).await;
    watcher.abort();

    if let Ok(turns) = &result {
        if let Some(line) = summary_line(turns) {
            println!("{}", line);
        }
    }
    result
}

/// Totals across every turn of a task; `None` when there is nothing to say.
fn summary_line(turns: &[TurnResult]) -> Option<String> {
    if turns.last().is_some_and(|turn| turn.cancelled) {
        return Some("⚠️  Operation cancelled by user (Ctrl+C)".to_string());
    }
    let calls: usize = turns.iter().map(|turn| turn.outcomes.len()).sum();
    if calls == 0 {
        return None;
    }
    let succeeded: usize = turns.iter().map(TurnResult::succeeded).sum();
    let failed: usize = turns.iter().map(TurnResult::failed).sum();
    Some(format!(
        "{} tool call(s) over {} turn(s): {} succeeded, {} failed",
        calls,
        turns.len(),
        succeeded,
        failed
    ))
}

/// Handle execution errors with detailed logging and user-friendly output.
pub fn handle_execution_error(e: &CoreError, input: &str) {
    error!("=== TASK EXECUTION ERROR ===");
    error!("Error: {}", e);
    error!("Task input: {}", input);

    println!("❌ Error: {}", e);

    if matches!(e, CoreError::Transport(_)) {
        println!("💡 This may be a temporary issue. Please try again or run with --verbose for details.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_task_offers_builtin_tools() {
        let context = vec![File::with_content("notes.md", "remember the milk")];
        let task = build_task("tidy up", &context).unwrap();

        assert_eq!(task.tools().names(), vec!["read_file", "write_file", "shell"]);
        assert_eq!(task.context().len(), 1);
        assert_eq!(task.user_text(), "Task: tidy up");
    }

    #[test]
    fn test_summary_totals_all_turns() {
        assert_eq!(summary_line(&[]), None);
        assert_eq!(summary_line(&[TurnResult::default()]), None);

        let cancelled = TurnResult {
            cancelled: true,
            ..Default::default()
        };
        let line = summary_line(&[TurnResult::default(), cancelled]).unwrap();
        assert!(line.contains("cancelled"));
    }
}
