use super::traits::{optional_bool, optional_u64, required_str, Tool, ToolResult};
use crate::security::{FileOperation, SecurityValidator};
use crate::util::floor_utf8_char_boundary;
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

const MAX_OUTPUT_BYTES: usize = 1_048_576; // 1 MB
const TIMEOUT_SECS: u64 = 30;

/// Search file contents by regex pattern.
///
/// Delegates to ripgrep (`rg`). When `rg` is not installed the tool reports an
/// error instead of an empty result.
pub struct ContentSearchTool {
    security: Arc<SecurityValidator>,
    rg_path: Option<PathBuf>,
}

impl ContentSearchTool {
    pub fn new(security: Arc<SecurityValidator>) -> Self {
        let rg_path = which::which("rg").ok();
        if rg_path.is_none() {
            tracing::debug!("ripgrep not found on PATH; Grep tool will report errors");
        }
        Self { security, rg_path }
    }

    #[cfg(test)]
    fn with_backend(security: Arc<SecurityValidator>, rg_path: Option<PathBuf>) -> Self {
        Self { security, rg_path }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Content,
    FilesWithMatches,
    Count,
}

impl OutputMode {
    fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim).unwrap_or("files_with_matches") {
            "content" => Some(Self::Content),
            "files_with_matches" | "" => Some(Self::FilesWithMatches),
            "count" => Some(Self::Count),
            _ => None,
        }
    }
}

#[async_trait]
impl Tool for ContentSearchTool {
    fn name(&self) -> &str {
        "Grep"
    }

    fn description(&self) -> &str {
        "Search for regex patterns in files using ripgrep. \
         Output modes: 'files_with_matches' (default, file paths only), \
         'content' (matching lines with line numbers), 'count' (matches per file)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in (defaults to current directory)"
                },
                "glob": {
                    "type": "string",
                    "description": "Glob pattern to filter files (e.g., '*.py')"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case insensitive search"
                },
                "output_mode": {
                    "type": "string",
                    "enum": ["content", "files_with_matches", "count"],
                    "description": "Output mode: show content, just filenames, or counts"
                },
                "context_lines": {
                    "type": "number",
                    "description": "Number of context lines to show around matches (content mode)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let pattern = required_str(&args, "pattern")?;
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(".");
        let glob = args
            .get("glob")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|g| !g.is_empty());
        let case_insensitive = optional_bool(&args, "case_insensitive").unwrap_or(false);
        let context_lines = optional_u64(&args, "context_lines").or_else(|| optional_u64(&args, "context"));

        let Some(mode) = OutputMode::parse(args.get("output_mode").and_then(|v| v.as_str())) else {
            return Ok(ToolResult::error(
                "Invalid output_mode. Use 'content', 'files_with_matches' or 'count'",
            ));
        };

        let finding = self.security.validate_file_path(path, FileOperation::Read);
        if !finding.is_safe {
            return Ok(ToolResult::error(format!(
                "Security check failed: {}",
                finding.message.unwrap_or_default()
            )));
        }

        let Some(rg) = self.rg_path.as_deref() else {
            return Ok(ToolResult::error(
                "ripgrep (rg) not found. Please install ripgrep to use the Grep tool.",
            ));
        };

        let search_path = self.security.resolve(path);
        let mut cmd = build_rg_command(
            rg,
            pattern,
            &search_path,
            mode,
            glob,
            case_insensitive,
            context_lines,
        );
        cmd.current_dir(&self.security.scope().cwd);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(Duration::from_secs(TIMEOUT_SECS), cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::error(
                    "ripgrep (rg) not found. Please install ripgrep to use the Grep tool.",
                ));
            }
            Ok(Err(e)) => {
                return Ok(ToolResult::error(format!("Failed to execute search command: {e}")));
            }
            Err(_) => {
                return Ok(ToolResult::error(format!(
                    "Search timed out after {TIMEOUT_SECS} seconds"
                )));
            }
        };

        // 0 = matches, 1 = no matches, 2 = error
        let exit_code = output.status.code().unwrap_or(-1);
        if !(0..=1).contains(&exit_code) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(ToolResult::error(format!("Search error: {}", stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut text = stdout.trim_end().to_string();
        if text.len() > MAX_OUTPUT_BYTES {
            text.truncate(floor_utf8_char_boundary(&text, MAX_OUTPUT_BYTES));
            text.push_str("\n\n[Output truncated: exceeded 1 MB limit]");
        }
        if text.is_empty() {
            text = "No matches found".to_string();
        }

        Ok(ToolResult::success(text)
            .with_metadata("pattern", pattern)
            .with_metadata("path", search_path.display().to_string()))
    }
}

fn build_rg_command(
    rg: &Path,
    pattern: &str,
    search_path: &Path,
    mode: OutputMode,
    glob: Option<&str>,
    case_insensitive: bool,
    context_lines: Option<u64>,
) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(rg);
    cmd.arg("--no-heading").arg("--color=never");

    if case_insensitive {
        cmd.arg("-i");
    }

    match mode {
        OutputMode::FilesWithMatches => {
            cmd.arg("-l");
        }
        OutputMode::Count => {
            cmd.arg("-c");
        }
        OutputMode::Content => {
            cmd.arg("-n");
            if let Some(ctx) = context_lines.filter(|c| *c > 0) {
                cmd.arg("-C").arg(ctx.to_string());
            }
        }
    }

    if let Some(glob) = glob {
        cmd.arg("-g").arg(glob);
    }

    cmd.arg("--").arg(pattern).arg(search_path);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PathScope;
    use tempfile::TempDir;

    fn validator(dir: &TempDir) -> Arc<SecurityValidator> {
        Arc::new(SecurityValidator::new(PathScope::new(dir.path(), dir.path())))
    }

    fn seeded_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nfn helper() {}\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "def main():\n    pass\n").unwrap();
        dir
    }

    fn args_of(cmd: &tokio::process::Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_flags_follow_mode() {
        let rg = Path::new("rg");
        let path = Path::new("/w");
        let files = args_of(&build_rg_command(
            rg, "x", path, OutputMode::FilesWithMatches, None, false, None,
        ));
        assert!(files.contains(&"-l".to_string()));

        let count = args_of(&build_rg_command(rg, "x", path, OutputMode::Count, None, true, None));
        assert!(count.contains(&"-c".to_string()));
        assert!(count.contains(&"-i".to_string()));

        let content = args_of(&build_rg_command(
            rg,
            "x",
            path,
            OutputMode::Content,
            Some("*.rs"),
            false,
            Some(2),
        ));
        assert!(content.contains(&"-n".to_string()));
        assert!(content.windows(2).any(|w| w == ["-C", "2"]));
        assert!(content.windows(2).any(|w| w == ["-g", "*.rs"]));
        assert_eq!(content.last().unwrap(), "/w");
    }

    #[test]
    fn unknown_output_mode_is_rejected() {
        assert_eq!(OutputMode::parse(None), Some(OutputMode::FilesWithMatches));
        assert_eq!(OutputMode::parse(Some("content")), Some(OutputMode::Content));
        assert_eq!(OutputMode::parse(Some("lines")), None);
    }

    #[tokio::test]
    async fn missing_ripgrep_is_an_error_not_empty_result() {
        let dir = seeded_dir();
        let tool = ContentSearchTool::with_backend(validator(&dir), None);
        let result = tool.execute(json!({ "pattern": "main" })).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().starts_with("ripgrep (rg) not found"));
    }

    #[tokio::test]
    async fn finds_files_with_ripgrep_when_available() {
        let Ok(rg) = which::which("rg") else {
            return;
        };
        let dir = seeded_dir();
        let tool = ContentSearchTool::with_backend(validator(&dir), Some(rg));

        let result = tool
            .execute(json!({ "pattern": "fn main", "glob": "*.rs" }))
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(result.output.contains("a.rs"));
        assert!(!result.output.contains("b.py"));
    }

    #[tokio::test]
    async fn no_matches_is_success() {
        let Ok(rg) = which::which("rg") else {
            return;
        };
        let dir = seeded_dir();
        let tool = ContentSearchTool::with_backend(validator(&dir), Some(rg));
        let result = tool
            .execute(json!({ "pattern": "does_not_exist_anywhere" }))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, "No matches found");
    }

    #[tokio::test]
    async fn search_root_outside_scope_is_blocked() {
        let dir = seeded_dir();
        let tool = ContentSearchTool::with_backend(validator(&dir), Some(PathBuf::from("rg")));
        let result = tool
            .execute(json!({ "pattern": "root", "path": "/etc" }))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().starts_with("Security check failed"));
    }
}
