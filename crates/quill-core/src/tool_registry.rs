//! Registry of the tools a task exposes to the model.
//!
//! Each tool is a [`ToolDescriptor`]: a name, a description, a JSON Schema
//! for its arguments and an async handler. The registry is built once from
//! a closed list of descriptors and rejects duplicate names up front.

use crate::error::CoreError;
use anyhow::Result;
use quill_providers::Tool;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment a tool handler runs in.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub working_dir: PathBuf,
}

impl ExecContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    /// Expand `~` and resolve relative paths against the working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            self.working_dir.join(expanded)
        }
    }
}

/// Async handler behind a tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &ExecContext) -> Result<String>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ExecContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    async fn call(&self, args: Value, ctx: &ExecContext) -> Result<String> {
        (self.0)(args, ctx.clone()).await
    }
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
        }
    }

    /// Build a descriptor around an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, ExecContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self::new(name, description, input_schema, FnHandler(handler))
    }

    /// Check `args` against the input schema.
    ///
    /// Covers the object shape, `required` keys and the primitive `type` of
    /// every declared property that is present.
    pub fn validate_args(&self, args: &Value) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };

        let Value::Object(fields) = args else {
            return Err(invalid("arguments must be a JSON object".to_string()));
        };

        if let Some(required) = self.input_schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(key) {
                    return Err(invalid(format!("missing required argument '{}'", key)));
                }
            }
        }

        if let Some(properties) = self
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
        {
            for (key, value) in fields {
                let Some(expected) = properties.get(key).and_then(|p| p.get("type")) else {
                    continue;
                };
                if !type_matches(expected, value) {
                    return Err(invalid(format!(
                        "argument '{}' should be of type {}",
                        key, expected
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn definition(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => primitive_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| primitive_matches(name, value)),
        // Unknown schema shape; nothing to enforce
        _ => true,
    }
}

fn primitive_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Ordered, duplicate-free set of tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, preserving the given order.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<Self, CoreError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            if registry.get(&descriptor.name).is_some() {
                return Err(CoreError::DuplicateTool(descriptor.name));
            }
            registry.tools.push(descriptor);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Wire definitions for providers with native tool calling.
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(name: &str) -> ToolDescriptor {
        ToolDescriptor::from_fn(
            name,
            "Echo the text back",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "times": {"type": "integer"}
                },
                "required": ["text"]
            }),
            |args: Value, _ctx: ExecContext| async move {
                anyhow::Ok(args["text"].as_str().unwrap_or_default().to_string())
            },
        )
    }

    #[test]
    fn test_registry_preserves_order() {
        let registry =
            ToolRegistry::from_descriptors(vec![echo("b"), echo("a"), echo("c")]).unwrap();
        assert_eq!(registry.names(), vec!["b", "a", "c"]);
        let definitions = registry.definitions();
        assert_eq!(definitions[1].name, "a");
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = ToolRegistry::from_descriptors(vec![echo("a"), echo("b"), echo("a")])
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateTool("a".to_string()));
    }

    #[test]
    fn test_validate_args() {
        let tool = echo("echo");
        assert!(tool.validate_args(&json!({"text": "hi"})).is_ok());
        assert!(tool.validate_args(&json!({"text": "hi", "times": 2, "extra": true})).is_ok());

        let missing = tool.validate_args(&json!({})).unwrap_err();
        assert!(missing.to_string().contains("missing required argument 'text'"));

        let wrong_type = tool.validate_args(&json!({"text": 5})).unwrap_err();
        assert!(matches!(wrong_type, CoreError::InvalidArguments { .. }));

        assert!(tool.validate_args(&json!({"text": "hi", "times": 1.5})).is_err());
        assert!(tool.validate_args(&json!("hi")).is_err());
    }

    #[tokio::test]
    async fn test_fn_handler_receives_context() {
        let tool = ToolDescriptor::from_fn(
            "where",
            "Report the working directory",
            json!({"type": "object"}),
            |_args: Value, ctx: ExecContext| async move {
                anyhow::Ok(ctx.working_dir.display().to_string())
            },
        );
        let ctx = ExecContext::new("/tmp/project");
        let output = tool.handler.call(json!({}), &ctx).await.unwrap();
        assert_eq!(output, "/tmp/project");
    }

    #[test]
    fn test_resolve_path() {
        let ctx = ExecContext::new("/work");
        assert_eq!(ctx.resolve_path("src/main.rs"), PathBuf::from("/work/src/main.rs"));
        assert_eq!(ctx.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
        if let Some(home) = dirs_home() {
            assert_eq!(ctx.resolve_path("~/notes.txt"), home.join("notes.txt"));
        }
    }

    fn dirs_home() -> Option<PathBuf> {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}
