use super::traits::{required_str, Tool, ToolResult};
use crate::security::{FileOperation, SecurityValidator};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Create or overwrite a file
pub struct FileWriteTool {
    security: Arc<SecurityValidator>,
}

impl FileWriteTool {
    pub fn new(security: Arc<SecurityValidator>) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Write content to a file (creates new or overwrites existing). Parent directories are created as needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let file_path = required_str(&args, "file_path")?;
        let content = required_str(&args, "content")?;

        let finding = self
            .security
            .validate_file_path(file_path, FileOperation::Write);
        if !finding.is_safe {
            return Ok(ToolResult::error(format!(
                "Security check failed: {}",
                finding.message.unwrap_or_default()
            )));
        }

        let resolved = self.security.resolve(file_path);
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!(
                    "Error creating directory {}: {e}",
                    parent.display()
                )));
            }
        }

        match tokio::fs::write(&resolved, content).await {
            Ok(()) => {
                tracing::debug!(path = %resolved.display(), bytes = content.len(), "file written");
                Ok(ToolResult::success(format!("File written successfully: {file_path}"))
                    .with_metadata("file_path", file_path)
                    .with_metadata("bytes_written", content.len()))
            }
            Err(e) => Ok(ToolResult::error(format!("Error writing file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PathScope;
    use tempfile::TempDir;

    fn tool_in(dir: &TempDir) -> FileWriteTool {
        FileWriteTool::new(Arc::new(SecurityValidator::new(PathScope::new(
            dir.path(),
            dir.path(),
        ))))
    }

    #[test]
    fn write_requires_permission() {
        let dir = TempDir::new().unwrap();
        assert!(tool_in(&dir).requires_permission());
        assert_eq!(tool_in(&dir).name(), "Write");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let result = tool_in(&dir)
            .execute(json!({ "file_path": "nested/deeper/out.txt", "content": "hi" }))
            .await
            .unwrap();
        assert!(result.is_success(), "{result:?}");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("nested/deeper/out.txt")).unwrap(),
            "hi"
        );
        assert_eq!(result.metadata["bytes_written"], 2);
    }

    #[tokio::test]
    async fn overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "old content").unwrap();
        tool_in(&dir)
            .execute(json!({ "file_path": "f.txt", "content": "new" }))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn refuses_sensitive_file() {
        let dir = TempDir::new().unwrap();
        let result = tool_in(&dir)
            .execute(json!({ "file_path": ".env", "content": "KEY=1" }))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert!(!dir.path().join(".env").exists());
    }

    #[tokio::test]
    async fn refuses_path_outside_scope() {
        let dir = TempDir::new().unwrap();
        let result = tool_in(&dir)
            .execute(json!({ "file_path": "/usr/local/flaco-test.txt", "content": "x" }))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("outside allowed scope"));
    }
}
