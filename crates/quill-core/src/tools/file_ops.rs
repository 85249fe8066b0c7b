//! File reading and writing tools.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::tool_registry::{ExecContext, ToolDescriptor};

pub fn read_file_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "read_file",
        "Read the contents of a file. Optionally read a character range with `start` and `end`.",
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "start": {
                    "type": "integer",
                    "description": "First character to read (0-based, inclusive)"
                },
                "end": {
                    "type": "integer",
                    "description": "Character to stop before (exclusive)"
                }
            },
            "required": ["file_path"]
        }),
        execute_read_file,
    )
}

pub fn write_file_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn(
        "write_file",
        "Create or overwrite a file. Parent directories are created as needed.",
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "The complete new contents of the file"
                }
            },
            "required": ["file_path", "content"]
        }),
        execute_write_file,
    )
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("missing '{}' argument", key))
}

/// Execute the `read_file` tool.
pub async fn execute_read_file(args: Value, ctx: ExecContext) -> Result<String> {
    let file_path = str_arg(&args, "file_path")?;
    let path = ctx.resolve_path(file_path);
    let start = args.get("start").and_then(Value::as_u64).map(|n| n as usize);
    let end = args.get("end").and_then(Value::as_u64).map(|n| n as usize);
    debug!("Reading file: {}, start={:?}, end={:?}", path.display(), start, end);

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if start.is_none() && end.is_none() {
        return Ok(content);
    }

    let total_chars = content.chars().count();
    let start = start.unwrap_or(0);
    let end = end.unwrap_or(total_chars).min(total_chars);
    if start > end {
        anyhow::bail!(
            "invalid range {}..{} for a file of {} characters",
            start,
            end,
            total_chars
        );
    }

    Ok(content.chars().skip(start).take(end - start).collect())
}

/// Execute the `write_file` tool.
pub async fn execute_write_file(args: Value, ctx: ExecContext) -> Result<String> {
    let file_path = str_arg(&args, "file_path")?;
    let content = str_arg(&args, "content")?;
    let path = ctx.resolve_path(file_path);
    debug!("Writing {} bytes to {}", content.len(), path.display());

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(format!(
        "Wrote {} lines ({} bytes) to {}",
        content.lines().count(),
        content.len(),
        file_path
    ))
}
