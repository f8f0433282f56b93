use super::traits::{optional_u64, required_str, Tool, ToolResult};
use crate::security::{FileOperation, SecurityValidator};
use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;

/// Lines longer than this many characters are cut.
const MAX_LINE_CHARS: usize = 2000;

/// Read file contents with line numbers
pub struct FileReadTool {
    security: Arc<SecurityValidator>,
}

impl FileReadTool {
    pub fn new(security: Arc<SecurityValidator>) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file from the filesystem. Output is line-numbered; \
         use offset and limit to read part of a large file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to read"
                },
                "offset": {
                    "type": "number",
                    "description": "Line number to start reading from (1-based, optional)"
                },
                "limit": {
                    "type": "number",
                    "description": "Number of lines to read (optional)"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let file_path = required_str(&args, "file_path")?;
        let offset = optional_u64(&args, "offset");
        let limit = optional_u64(&args, "limit");

        let finding = self
            .security
            .validate_file_path(file_path, FileOperation::Read);
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

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(ToolResult::error(format!("Error reading file: {e}"))),
        };
        let contents = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = contents.lines().collect();
        let total = lines.len();

        let start = usize::try_from(offset.unwrap_or(1).max(1) - 1)
            .unwrap_or(usize::MAX)
            .min(total);
        let end = match limit {
            Some(limit) => start
                .saturating_add(usize::try_from(limit).unwrap_or(usize::MAX))
                .min(total),
            None => total,
        };

        let mut output = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            if i > 0 {
                output.push('\n');
            }
            let number = start + i + 1;
            match line.char_indices().nth(MAX_LINE_CHARS) {
                Some((cut, _)) => {
                    let _ = write!(output, "{number:>6}\t{}... [truncated]", &line[..cut]);
                }
                None => {
                    let _ = write!(output, "{number:>6}\t{line}");
                }
            }
        }

        let mut result = ToolResult::success(output)
            .with_metadata("file_path", file_path)
            .with_metadata("lines_read", end - start)
            .with_metadata("total_lines", total);
        if let Some(warning) = finding.message {
            result = result.with_metadata("warning", warning);
        }
        Ok(result)
    }
}
