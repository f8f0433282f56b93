//! Tool subsystem for model-callable capabilities.
//!
//! Each tool implements the [`Tool`] trait defined in [`traits`]: a name, a
//! description, a JSON parameter schema, a static permission flag and an async
//! `execute` returning a uniform [`ToolResult`].
//!
//! [`default_registry`] assembles the eight built-in tools. Path and command
//! checks are injected through a shared
//! [`SecurityValidator`](crate::security::SecurityValidator).
//!
//! # Extension
//!
//! To add a tool, implement [`Tool`] in a new submodule and register it in
//! [`default_tools`].

pub mod content_search;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod git_operations;
pub mod glob_search;
pub mod shell;
pub mod todo_write;
pub mod traits;

pub use content_search::ContentSearchTool;
pub use file_edit::FileEditTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use git_operations::GitOperationsTool;
pub use glob_search::GlobSearchTool;
pub use shell::ShellTool;
pub use todo_write::TodoWriteTool;
pub use traits::{Tool, ToolResult, ToolSpec, ToolStatus};

use crate::security::SecurityValidator;
use std::sync::Arc;

/// Built-in tools in the order they are advertised to the model.
pub fn default_tools(security: Arc<SecurityValidator>) -> Vec<Box<dyn Tool>> {
    let workspace = security.scope().cwd.clone();
    vec![
        Box::new(FileReadTool::new(security.clone())),
        Box::new(FileWriteTool::new(security.clone())),
        Box::new(FileEditTool::new(security.clone())),
        Box::new(GlobSearchTool::new(security.clone())),
        Box::new(ContentSearchTool::new(security.clone())),
        Box::new(ShellTool::new(security.clone())),
        Box::new(GitOperationsTool::new(security)),
        Box::new(TodoWriteTool::new(&workspace)),
    ]
}

/// Name-indexed collection of tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(AsRef::as_ref)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|tool| tool.spec()).collect()
    }

    /// Function-calling schemas for every registered tool.
    pub fn schemas(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|tool| tool.spec().to_function_schema())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registry of the built-in tools.
pub fn default_registry(security: Arc<SecurityValidator>) -> ToolRegistry {
    ToolRegistry::new(default_tools(security))
}
