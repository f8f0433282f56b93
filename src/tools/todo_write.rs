//! Task list the model maintains while working through multi-step requests.
//!
//! Every call replaces the whole list. The list is kept in memory for the
//! session and mirrored to `.flaco_todos.json` in the workspace so it survives
//! restarts.

use super::traits::{Tool, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write;
use std::path::{Path, PathBuf};

pub const TODO_FILE_NAME: &str = ".flaco_todos.json";

// ── Data Structures ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    fn icon(self) -> &'static str {
        match self {
            TodoStatus::Pending => "⏳",
            TodoStatus::InProgress => "🔄",
            TodoStatus::Completed => "✅",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    #[serde(rename = "activeForm", default)]
    pub active_form: String,
}

// ── Tool ─────────────────────────────────────────────────────────────────

pub struct TodoWriteTool {
    todo_file: PathBuf,
    todos: RwLock<Vec<TodoItem>>,
}

impl TodoWriteTool {
    /// Tool persisting to `<workspace_dir>/.flaco_todos.json`, seeded from that
    /// file when it already exists.
    pub fn new(workspace_dir: &Path) -> Self {
        let todo_file = workspace_dir.join(TODO_FILE_NAME);
        let todos = load_todos(&todo_file).unwrap_or_default();
        Self {
            todo_file,
            todos: RwLock::new(todos),
        }
    }

    /// Snapshot of the current list.
    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos.read().clone()
    }
}

fn load_todos(path: &Path) -> Option<Vec<TodoItem>> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(todos) => Some(todos),
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable todo file: {e}");
            None
        }
    }
}

fn format_todos(todos: &[TodoItem]) -> String {
    let mut out = String::from("Task List:\n");
    for (i, todo) in todos.iter().enumerate() {
        let _ = writeln!(out, "{}. {} {}", i + 1, todo.status.icon(), todo.content);
    }
    out
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "TodoWrite"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session. \
         Send the complete list every time; exactly one task must be in_progress."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "The complete, updated task list",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {
                                "type": "string",
                                "description": "Imperative description of the task"
                            },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            },
                            "activeForm": {
                                "type": "string",
                                "description": "Present continuous form shown while the task runs"
                            }
                        },
                        "required": ["content", "status", "activeForm"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let raw = args
            .get("todos")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing 'todos' parameter"))?;

        let todos: Vec<TodoItem> = match serde_json::from_value(raw) {
            Ok(todos) => todos,
            Err(e) => return Ok(ToolResult::error(format!("Invalid todo list: {e}"))),
        };

        let in_progress = todos
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .count();
        if in_progress != 1 {
            return Ok(ToolResult::error(format!(
                "Exactly one task must be in_progress (found {in_progress})"
            )));
        }

        let serialized = serde_json::to_string_pretty(&todos)?;
        if let Err(e) = tokio::fs::write(&self.todo_file, serialized).await {
            return Ok(ToolResult::error(format!("Error managing todos: {e}")));
        }

        let completed = todos
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
            .count();
        let output = format_todos(&todos);
        let total = todos.len();
        *self.todos.write() = todos;

        Ok(ToolResult::success(output)
            .with_metadata("total", total)
            .with_metadata("completed", completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(content: &str, status: &str) -> serde_json::Value {
        json!({ "content": content, "status": status, "activeForm": format!("{content}ing") })
    }

    #[tokio::test]
    async fn accepts_list_with_exactly_one_in_progress() {
        let dir = TempDir::new().unwrap();
        let tool = TodoWriteTool::new(dir.path());
        let result = tool
            .execute(json!({ "todos": [
                item("Write tests", "completed"),
                item("Fix bug", "in_progress"),
                item("Ship", "pending"),
            ]}))
            .await
            .unwrap();

        assert!(result.is_success(), "{result:?}");
        assert!(result.output.starts_with("Task List:\n1. ✅ Write tests\n2. 🔄 Fix bug"));
        assert_eq!(result.metadata["total"], 3);
        assert_eq!(result.metadata["completed"], 1);
        assert_eq!(tool.todos().len(), 3);
    }

    #[tokio::test]
    async fn rejects_zero_or_many_in_progress() {
        let dir = TempDir::new().unwrap();
        let tool = TodoWriteTool::new(dir.path());

        let none = tool
            .execute(json!({ "todos": [item("a", "pending")] }))
            .await
            .unwrap();
        assert_eq!(
            none.error.as_deref(),
            Some("Exactly one task must be in_progress (found 0)")
        );

        let two = tool
            .execute(json!({ "todos": [item("a", "in_progress"), item("b", "in_progress")] }))
            .await
            .unwrap();
        assert_eq!(
            two.error.as_deref(),
            Some("Exactly one task must be in_progress (found 2)")
        );
        assert!(!dir.path().join(TODO_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn rejects_unknown_status() {
        let dir = TempDir::new().unwrap();
        let result = TodoWriteTool::new(dir.path())
            .execute(json!({ "todos": [item("a", "blocked")] }))
            .await
            .unwrap();
        assert!(result.error.unwrap().starts_with("Invalid todo list"));
    }

    #[tokio::test]
    async fn list_is_persisted_and_reloaded() {
        let dir = TempDir::new().unwrap();
        TodoWriteTool::new(dir.path())
            .execute(json!({ "todos": [item("persist me", "in_progress")] }))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join(TODO_FILE_NAME)).unwrap();
        assert!(raw.contains("\"activeForm\""));

        let reloaded = TodoWriteTool::new(dir.path());
        assert_eq!(reloaded.todos()[0].content, "persist me");
        assert_eq!(reloaded.todos()[0].status, TodoStatus::InProgress);
    }
}
