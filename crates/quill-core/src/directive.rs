//! Tool directives embedded in model output.
//!
//! A directive is a JSON payload wrapped in an open and a close sentinel:
//!
//! ```text
//! <tool_call>{"name": "write_file", "args": {"file_path": "a.txt", "content": "hi"}}</tool_call>
//! ```
//!
//! The payload must be a JSON object with a non-empty string `name` (`tool`
//! is accepted as an alias) and an optional `args` object, which defaults to
//! `{}`. Anything else between the sentinels is a parse error and is shown
//! to the user as plain text.
//!
//! Sentinels are configurable per task; they must be non-empty and distinct.

use crate::error::CoreError;
use serde_json::{Map, Value};

pub const DEFAULT_OPEN: &str = "<tool_call>";
pub const DEFAULT_CLOSE: &str = "</tool_call>";

/// The open/close marker pair delimiting a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    open: String,
    close: String,
}

impl Sentinels {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Result<Self, CoreError> {
        let open = open.into();
        let close = close.into();
        if open.is_empty() || close.is_empty() {
            return Err(CoreError::InvalidSentinels(
                "sentinels must not be empty".to_string(),
            ));
        }
        if open == close {
            return Err(CoreError::InvalidSentinels(format!(
                "open and close sentinels are both '{}'",
                open
            )));
        }
        Ok(Self { open, close })
    }

    pub fn open(&self) -> &str {
        &self.open
    }

    pub fn close(&self) -> &str {
        &self.close
    }

    /// Wrap a payload in this sentinel pair.
    pub fn wrap(&self, payload: &str) -> String {
        format!("{}{}{}", self.open, payload, self.close)
    }
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            open: DEFAULT_OPEN.to_string(),
            close: DEFAULT_CLOSE.to_string(),
        }
    }
}

/// A successfully parsed directive payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDirective {
    pub tool_name: String,
    pub args: Value,
}

/// Parse the text between the sentinels.
pub fn parse_payload(payload: &str) -> Result<ParsedDirective, CoreError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(parse_error("empty payload"));
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| parse_error(format!("invalid JSON: {}", e)))?;
    let Value::Object(mut object) = value else {
        return Err(parse_error("payload is not a JSON object"));
    };

    let tool_name = match object.remove("name").or_else(|| object.remove("tool")) {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        Some(Value::String(_)) => return Err(parse_error("tool name is empty")),
        Some(_) => return Err(parse_error("tool name is not a string")),
        None => return Err(parse_error("missing \"name\" field")),
    };

    let args = match object.remove("args") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(args @ Value::Object(_)) => args,
        Some(_) => return Err(parse_error("\"args\" is not a JSON object")),
    };

    Ok(ParsedDirective { tool_name, args })
}

fn parse_error(reason: impl Into<String>) -> CoreError {
    CoreError::Parse {
        reason: reason.into(),
    }
}

/// Human-readable description of the directive format, for system prompts.
pub fn format_instructions(sentinels: &Sentinels) -> String {
    let example = sentinels.wrap(
        r#"{"name": "write_file", "args": {"file_path": "hello.txt", "content": "Hello"}}"#,
    );
    format!(
        "To use a tool, write a directive anywhere in your reply:\n\n\
         {example}\n\n\
         The text between {open} and {close} must be a single JSON object with the tool \
         \"name\" and its \"args\" object. You may emit several directives in one reply. \
         Tools run after your reply is complete and their results are sent back to you \
         in the next message, in the order you wrote the directives.",
        example = example,
        open = sentinels.open(),
        close = sentinels.close(),
    )
}
