use super::traits::{required_str, Tool, ToolResult};
use crate::security::{sanitize_output, SecurityValidator};
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

const GIT_TIMEOUT_SECS: u64 = 30;
const MAX_OUTPUT_CHARS: usize = 30_000;

const OPERATIONS: &[&str] = &[
    "status", "diff", "log", "add", "commit", "push", "pull", "branch", "checkout",
];

/// Structured wrapper over common git subcommands
pub struct GitOperationsTool {
    security: Arc<SecurityValidator>,
}

impl GitOperationsTool {
    pub fn new(security: Arc<SecurityValidator>) -> Self {
        Self { security }
    }
}

/// Extra arguments may arrive as an array or a single whitespace-separated string.
fn parse_extra_args(args: &serde_json::Value) -> anyhow::Result<Vec<String>> {
    match args.get("args") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s.clone()),
                serde_json::Value::Number(n) => Ok(n.to_string()),
                other => anyhow::bail!("Invalid git argument: {other}"),
            })
            .collect(),
        Some(serde_json::Value::String(s)) => {
            Ok(s.split_whitespace().map(ToString::to_string).collect())
        }
        Some(other) => anyhow::bail!("'args' must be an array of strings, got {other}"),
    }
}

fn build_git_argv(operation: &str, extra: Vec<String>, message: Option<&str>) -> Vec<String> {
    let mut argv = vec![operation.to_string()];
    argv.extend(extra);
    if operation == "commit" {
        if let Some(message) = message {
            argv.push("-m".to_string());
            argv.push(message.to_string());
        }
    }
    argv
}

#[async_trait]
impl Tool for GitOperationsTool {
    fn name(&self) -> &str {
        "Git"
    }

    fn description(&self) -> &str {
        "Perform git operations (status, diff, log, add, commit, push, pull, branch, checkout)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": OPERATIONS,
                    "description": "The git operation to perform"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Additional arguments for the git command"
                },
                "message": {
                    "type": "string",
                    "description": "Commit message (for commit operation)"
                }
            },
            "required": ["operation"]
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let operation = required_str(&args, "operation")?.trim();
        if !OPERATIONS.contains(&operation) {
            return Ok(ToolResult::error(format!(
                "Unsupported git operation: {operation}. Supported: {}",
                OPERATIONS.join(", ")
            )));
        }

        let extra = match parse_extra_args(&args) {
            Ok(extra) => extra,
            Err(e) => return Ok(ToolResult::error(e.to_string())),
        };
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .filter(|m| !m.trim().is_empty());
        let argv = build_git_argv(operation, extra, message);

        let mut cmd = tokio::process::Command::new("git");
        cmd.args(&argv)
            .current_dir(&self.security.scope().cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(?argv, "running git");

        let output =
            match tokio::time::timeout(Duration::from_secs(GIT_TIMEOUT_SECS), cmd.output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Ok(ToolResult::error(format!(
                        "Error executing git command: {e}"
                    )));
                }
                Err(_) => {
                    return Ok(ToolResult::error(format!(
                        "Git command timed out after {GIT_TIMEOUT_SECS} seconds"
                    )));
                }
            };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push('\n');
            combined.push_str(&stderr);
        }
        let combined = sanitize_output(&combined, MAX_OUTPUT_CHARS);
        let code = output.status.code().unwrap_or(-1);

        let result = if output.status.success() {
            ToolResult::success(combined)
        } else {
            ToolResult::error(format!("git {operation} exited with code {code}")).with_output(combined)
        };
        Ok(result
            .with_metadata("operation", operation)
            .with_metadata("return_code", code))
    }
}
