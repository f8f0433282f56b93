use super::traits::{optional_bool, required_str, Tool, ToolResult};
use crate::security::{FileOperation, SecurityValidator};
use crate::util::{char_prefix, truncate_with_ellipsis};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Exact substring replacement inside an existing file
pub struct FileEditTool {
    security: Arc<SecurityValidator>,
}

impl FileEditTool {
    pub fn new(security: Arc<SecurityValidator>) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Perform exact string replacement in a file. old_string must match exactly \
         (including whitespace) and be unique unless replace_all is true."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The string to replace it with"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let file_path = required_str(&args, "file_path")?;
        let old_string = required_str(&args, "old_string")?;
        let new_string = required_str(&args, "new_string")?;
        let replace_all = optional_bool(&args, "replace_all").unwrap_or(false);

        if old_string.is_empty() {
            return Ok(ToolResult::error("old_string must not be empty"));
        }

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
        if !tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
            return Ok(ToolResult::error(format!("File not found: {file_path}")));
        }

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolResult::error(format!("Error editing file: {e}"))),
        };

        let occurrences = content.matches(old_string).count();
        if occurrences == 0 {
            let preview: String = content.lines().take(10).collect::<Vec<_>>().join("\n");
            return Ok(ToolResult::error(format!(
                "String not found in file '{file_path}'.\n\
                 Searched for: {}\n\n\
                 File preview (first 10 lines):\n{}\n\n\
                 Tip: Make sure whitespace and indentation match exactly.",
                truncate_with_ellipsis(old_string, 200),
                char_prefix(&preview, 500)
            )));
        }

        if occurrences > 1 && !replace_all {
            return Ok(ToolResult::error(format!(
                "String appears {occurrences} times. Use replace_all=true or provide more context"
            )));
        }

        let (updated, count) = if replace_all {
            (content.replace(old_string, new_string), occurrences)
        } else {
            (content.replacen(old_string, new_string, 1), 1)
        };

        if let Err(e) = tokio::fs::write(&resolved, updated).await {
            return Ok(ToolResult::error(format!("Error editing file: {e}")));
        }

        Ok(ToolResult::success(format!(
            "Successfully replaced {count} occurrence(s) in {file_path}"
        ))
        .with_metadata("file_path", file_path)
        .with_metadata("replacements", count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PathScope;
    use tempfile::TempDir;

    fn tool_in(dir: &TempDir) -> FileEditTool {
        FileEditTool::new(Arc::new(SecurityValidator::new(PathScope::new(
            dir.path(),
            dir.path(),
        ))))
    }

    #[tokio::test]
    async fn non_unique_match_without_replace_all_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("t.txt"), "test test test").unwrap();

        let result = tool_in(&dir)
            .execute(json!({
                "file_path": "t.txt",
                "old_string": "test",
                "new_string": "x",
                "replace_all": false
            }))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(
            result.error.as_deref(),
            Some("String appears 3 times. Use replace_all=true or provide more context")
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("t.txt")).unwrap(),
            "test test test"
        );
    }

    #[tokio::test]
    async fn replace_all_rewrites_every_occurrence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("t.txt"), "test test test").unwrap();

        let result = tool_in(&dir)
            .execute(json!({
                "file_path": "t.txt",
                "old_string": "test",
                "new_string": "x",
                "replace_all": true
            }))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, "Successfully replaced 3 occurrence(s) in t.txt");
        assert_eq!(std::fs::read_to_string(dir.path().join("t.txt")).unwrap(), "x x x");
    }

    #[tokio::test]
    async fn unique_match_is_replaced_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("m.rs"), "fn old() {}\nfn keep() {}\n").unwrap();

        let result = tool_in(&dir)
            .execute(json!({
                "file_path": "m.rs",
                "old_string": "fn old()",
                "new_string": "fn new()"
            }))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.metadata["replacements"], 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("m.rs")).unwrap(),
            "fn new() {}\nfn keep() {}\n"
        );
    }

    #[tokio::test]
    async fn absent_target_reports_preview() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("p.txt"), "first line\nsecond line\n").unwrap();

        let result = tool_in(&dir)
            .execute(json!({
                "file_path": "p.txt",
                "old_string": "missing",
                "new_string": "x"
            }))
            .await
            .unwrap();
        let error = result.error.unwrap();
        assert!(error.starts_with("String not found in file 'p.txt'"));
        assert!(error.contains("first line"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let result = tool_in(&dir)
            .execute(json!({
                "file_path": "ghost.txt",
                "old_string": "a",
                "new_string": "b"
            }))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("File not found: ghost.txt"));
    }
}
