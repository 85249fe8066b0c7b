//! Shell command execution tool.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::process::Stdio;
use tracing::debug;

use crate::tool_registry::{ExecContext, ToolDescriptor};

pub fn shell_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "shell",
        "Run a shell command in the workspace and return its output",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line passed to `sh -c`"
                }
            },
            "required": ["command"]
        }),
        execute_shell,
    )
}

/// Execute the `shell` tool.
///
/// A non-zero exit status is an error carrying stderr (or stdout when
/// stderr is empty).
pub async fn execute_shell(args: Value, ctx: ExecContext) -> Result<String> {
    let command = args
        .get("command")
        .and_then(Value::as_str)
        .context("missing 'command' argument")?;
    debug!("Running shell command in {}: {}", ctx.working_dir.display(), command);

    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.working_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to spawn `{}`", command))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        if detail.is_empty() {
            anyhow::bail!("command failed with exit code {}", code);
        }
        anyhow::bail!("command failed with exit code {}: {}", code, detail);
    }

    let stdout = stdout.trim_end();
    Ok(if stdout.is_empty() {
        "Command executed successfully (no output)".to_string()
    } else {
        stdout.to_string()
    })
}
