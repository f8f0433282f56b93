use super::traits::{required_str, Tool, ToolResult};
use crate::security::{FileOperation, SecurityValidator};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

const MAX_RESULTS: usize = 1000;

/// Find files by glob pattern, newest first
pub struct GlobSearchTool {
    security: Arc<SecurityValidator>,
}

impl GlobSearchTool {
    pub fn new(security: Arc<SecurityValidator>) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Tool for GlobSearchTool {
    fn name(&self) -> &str {
        "Glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern (e.g., '**/*.py'). Results are sorted by modification time, most recent first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The glob pattern to match (e.g., '**/*.py', 'src/**/*.ts')"
                },
                "path": {
                    "type": "string",
                    "description": "The directory to search in (defaults to current directory)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let pattern = required_str(&args, "pattern")?.trim().to_string();
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(".");

        if pattern.is_empty() {
            return Ok(ToolResult::error("Pattern must not be empty"));
        }
        if Path::new(&pattern).is_absolute() {
            return Ok(ToolResult::error(
                "Pattern must be relative to the search path; pass the directory as 'path'",
            ));
        }

        let finding = self.security.validate_file_path(path, FileOperation::Read);
        if !finding.is_safe {
            return Ok(ToolResult::error(format!(
                "Security check failed: {}",
                finding.message.unwrap_or_default()
            )));
        }

        let base = self.security.resolve(path);
        let recursive = if pattern.starts_with("**") {
            pattern.clone()
        } else {
            format!("**/{pattern}")
        };
        let full_pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            recursive
        );

        let matches = tokio::task::spawn_blocking(move || collect_matches(&full_pattern))
            .await
            .map_err(|e| anyhow::anyhow!("Glob worker failed: {e}"))?;

        let files = match matches {
            Ok(files) => files,
            Err(e) => return Ok(ToolResult::error(format!("Invalid glob pattern: {e}"))),
        };

        if files.is_empty() {
            return Ok(ToolResult::success(format!(
                "No files found matching pattern: {pattern}"
            ))
            .with_metadata("pattern", pattern)
            .with_metadata("count", 0));
        }

        let count = files.len();
        let truncated = count > MAX_RESULTS;
        let mut output = files
            .iter()
            .take(MAX_RESULTS)
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if truncated {
            output.push_str(&format!("\n... ({} more files)", count - MAX_RESULTS));
        }

        Ok(ToolResult::success(output)
            .with_metadata("pattern", pattern)
            .with_metadata("count", count))
    }
}

/// Regular files matching `pattern`, most recently modified first.
fn collect_matches(pattern: &str) -> Result<Vec<PathBuf>, glob::PatternError> {
    let mut files: Vec<(PathBuf, SystemTime)> = glob::glob(pattern)?
        .filter_map(Result::ok)
        .filter_map(|path| {
            let meta = std::fs::metadata(&path).ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(files.into_iter().map(|(path, _)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PathScope;
    use std::time::Duration;
    use tempfile::TempDir;

    fn tool_in(dir: &TempDir) -> GlobSearchTool {
        GlobSearchTool::new(Arc::new(SecurityValidator::new(PathScope::new(
            dir.path(),
            dir.path(),
        ))))
    }

    fn touch_with_age(path: &Path, age: Duration) {
        std::fs::write(path, "x").unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn matches_recursively_newest_first() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        touch_with_age(&dir.path().join("src/old.rs"), Duration::from_secs(3600));
        touch_with_age(&dir.path().join("src/nested/new.rs"), Duration::from_secs(10));
        touch_with_age(&dir.path().join("notes.md"), Duration::from_secs(5));

        let result = tool_in(&dir)
            .execute(json!({ "pattern": "**/*.rs" }))
            .await
            .unwrap();
        assert!(result.is_success());
        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("new.rs"));
        assert!(lines[1].ends_with("old.rs"));
        assert_eq!(result.metadata["count"], 2);
    }

    #[tokio::test]
    async fn bare_pattern_searches_subdirectories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "").unwrap();
        std::fs::write(dir.path().join("top.rs"), "").unwrap();
        std::fs::write(dir.path().join("readme.md"), "").unwrap();

        let result = tool_in(&dir)
            .execute(json!({ "pattern": "*.rs" }))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.metadata["count"], 2);
        assert!(result.output.lines().any(|l| l.ends_with("src/nested/deep.rs")));
        assert!(result.output.lines().any(|l| l.ends_with("top.rs")));
    }

    #[tokio::test]
    async fn directory_prefixed_pattern_still_matches_at_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/a")).unwrap();
        std::fs::write(dir.path().join("src/a/mod.ts"), "").unwrap();
        std::fs::write(dir.path().join("other.ts"), "").unwrap();

        let result = tool_in(&dir)
            .execute(json!({ "pattern": "src/**/*.ts" }))
            .await
            .unwrap();
        assert_eq!(result.output.lines().count(), 1);
        assert!(result.output.ends_with("mod.ts"));
    }

    #[tokio::test]
    async fn directories_are_excluded() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg.rs")).unwrap();
        std::fs::write(dir.path().join("lib.rs"), "").unwrap();

        let result = tool_in(&dir)
            .execute(json!({ "pattern": "*.rs" }))
            .await
            .unwrap();
        assert_eq!(result.output.lines().count(), 1);
        assert!(result.output.ends_with("lib.rs"));
    }

    #[tokio::test]
    async fn no_match_is_success_with_message() {
        let dir = TempDir::new().unwrap();
        let result = tool_in(&dir)
            .execute(json!({ "pattern": "*.zig" }))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, "No files found matching pattern: *.zig");
    }

    #[tokio::test]
    async fn search_root_outside_scope_is_blocked() {
        let dir = TempDir::new().unwrap();
        let result = tool_in(&dir)
            .execute(json!({ "pattern": "*", "path": "/usr" }))
            .await
            .unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn invalid_pattern_is_reported() {
        let dir = TempDir::new().unwrap();
        let result = tool_in(&dir)
            .execute(json!({ "pattern": "***" }))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().starts_with("Invalid glob pattern"));
    }
}
