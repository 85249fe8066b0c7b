//! Built-in tools.
//!
//! - `file_ops` - reading and writing files
//! - `shell` - running shell commands

pub mod file_ops;
pub mod shell;

use crate::tool_registry::ToolDescriptor;

/// The default tool set, in the order it is advertised to the model.
pub fn builtin_tools() -> Vec<ToolDescriptor> {
    vec![
        file_ops::read_file_tool(),
        file_ops::write_file_tool(),
        shell::shell_tool(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_registry::ToolRegistry;

    #[test]
    fn test_builtin_tools_are_unique_and_ordered() {
        let registry = ToolRegistry::from_descriptors(builtin_tools()).unwrap();
        assert_eq!(registry.names(), vec!["read_file", "write_file", "shell"]);
    }
}
