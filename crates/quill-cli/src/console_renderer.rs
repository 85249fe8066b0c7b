//! Terminal renderer: streams model text to stdout and prints a status line
//! per invocation.

use crossterm::style::{Color, ResetColor, SetForegroundColor};
use quill_core::{InvocationStatus, ProcessorEvent, Renderer};
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug)]
struct RenderState {
    at_line_start: bool,
}

/// Console implementation of [`Renderer`] that prints to stdout.
#[derive(Debug)]
pub struct ConsoleRenderer {
    state: Mutex<RenderState>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RenderState { at_line_start: true }),
        }
    }

    fn print_inline(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        print!("{}", text);
        let _ = io::stdout().flush();
        if let Ok(mut state) = self.state.lock() {
            state.at_line_start = text.ends_with('\n');
        }
    }

    fn print_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        if let Ok(mut state) = self.state.lock() {
            if !state.at_line_start {
                let _ = writeln!(stdout);
            }
            state.at_line_start = true;
        }
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for ConsoleRenderer {
    fn on_event(&self, event: &ProcessorEvent) {
        match event {
            ProcessorEvent::Content(text) => self.print_inline(text),
            ProcessorEvent::InvocationQueued { index, tool_name } => self.print_inline(&format!(
                "{}[{} #{}]{}",
                SetForegroundColor(Color::DarkGrey),
                tool_name,
                index,
                ResetColor
            )),
            ProcessorEvent::ParseError { reason, .. } => self.print_line(&format!(
                "{}⚠️  Ignoring malformed tool directive: {}{}",
                SetForegroundColor(Color::Yellow),
                reason,
                ResetColor
            )),
            ProcessorEvent::InvocationStarted { index, tool_name } => self.print_line(&format!(
                "{}▶ {} #{}{}",
                SetForegroundColor(Color::Cyan),
                tool_name,
                index,
                ResetColor
            )),
            ProcessorEvent::InvocationSettled {
                index,
                tool_name,
                elapsed,
                status,
            } => self.print_line(&settled_line(tool_name, *index, *elapsed, status)),
        }
    }

    fn cleanup(&self) {
        let mut stdout = io::stdout().lock();
        if let Ok(mut state) = self.state.lock() {
            if !state.at_line_start {
                let _ = writeln!(stdout);
                state.at_line_start = true;
            }
        }
        let _ = stdout.flush();
    }
}

fn settled_line(tool_name: &str, index: usize, elapsed: Duration, status: &InvocationStatus) -> String {
    match status {
        InvocationStatus::Succeeded(output) => format!(
            "{}✓ {} #{}{} ({}) {}",
            SetForegroundColor(Color::Green),
            tool_name,
            index,
            ResetColor,
            format_duration(elapsed),
            preview(output)
        )
        .trim_end()
        .to_string(),
        InvocationStatus::Failed(error) => format!(
            "{}✗ {} #{} ({}): {}{}",
            SetForegroundColor(Color::Red),
            tool_name,
            index,
            format_duration(elapsed),
            error,
            ResetColor
        ),
    }
}

/// First line of a tool's output, shortened for the status line.
fn preview(output: &str) -> String {
    let first_line = output.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() > PREVIEW_CHARS {
        let cut: String = first_line.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else if output.lines().nth(1).is_some() {
        format!("{} …", first_line)
    } else {
        first_line.to_string()
    }
}

/// `42ms`, `1.5s` or `2m 5s`.
pub fn format_duration(duration: Duration) -> String {
    match duration.as_secs() {
        0 => format!("{}ms", duration.as_millis()),
        1..=59 => format!("{:.1}s", duration.as_secs_f64()),
        secs => format!("{}m {}s", secs / 60, secs % 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::CoreError;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_preview_shortens_output() {
        assert_eq!(preview("done"), "done");
        assert_eq!(preview("line one\nline two"), "line one …");
        assert_eq!(preview(""), "");

        let long = "x".repeat(200);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 1);
        assert!(shown.ends_with('…'));
    }

    #[test]
    fn test_settled_line_mentions_tool_and_outcome() {
        let ok = settled_line(
            "shell",
            2,
            Duration::from_millis(12),
            &InvocationStatus::Succeeded("a.txt\nb.txt".into()),
        );
        assert!(ok.contains("shell #2"));
        assert!(ok.contains("12ms"));
        assert!(ok.contains("a.txt"));

        let failed = settled_line(
            "read_file",
            0,
            Duration::from_millis(3),
            &InvocationStatus::Failed(CoreError::UnknownTool {
                name: "read_file".into(),
            }),
        );
        assert!(failed.contains("read_file #0"));
        assert!(failed.contains("unknown tool"));
    }

    #[test]
    fn test_cleanup_is_safe_to_repeat() {
        let renderer = ConsoleRenderer::new();
        renderer.on_event(&ProcessorEvent::Content("partial".into()));
        renderer.cleanup();
        renderer.cleanup();
        assert!(renderer.state.lock().unwrap().at_line_start);
    }
}
