use super::traits::{optional_u64, Tool, ToolResult};
use crate::security::{sanitize_output, FileOperation, SecurityValidator};
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// Default command timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Hard ceiling regardless of what the model requests.
const MAX_TIMEOUT_SECS: u64 = 600;
/// Combined output is sanitized down to this many characters.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Shell command execution tool
pub struct ShellTool {
    security: Arc<SecurityValidator>,
}

impl ShellTool {
    pub fn new(security: Arc<SecurityValidator>) -> Self {
        Self { security }
    }
}

fn extract_command_argument(args: &serde_json::Value) -> Option<String> {
    for key in ["command", "cmd", "script", "bash"] {
        if let Some(command) = args
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
        {
            return Some(command.to_string());
        }
    }

    args.as_str()
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(ToString::to_string)
}

/// Requested timeout clamped to `1..=MAX_TIMEOUT_SECS`.
fn effective_timeout(requested: Option<u64>) -> u64 {
    requested
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .clamp(1, MAX_TIMEOUT_SECS)
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command. Use for running tests, builds, package managers and other terminal operations. \
         stdout and stderr are combined; secrets in the output are redacted."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default: 120, max: 600)"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory for the command (default: current directory)"
                }
            },
            "required": ["command"]
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let command = extract_command_argument(&args)
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' parameter"))?;
        let timeout_secs = effective_timeout(optional_u64(&args, "timeout"));

        let finding = self.security.validate_command(&command);
        if !finding.is_safe {
            return Ok(ToolResult::error(format!(
                "Security check failed: {}",
                finding.message.unwrap_or_default()
            )));
        }

        let working_dir = match args
            .get("working_dir")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            Some(dir) => {
                let dir_finding = self.security.validate_file_path(dir, FileOperation::Read);
                if !dir_finding.is_safe {
                    return Ok(ToolResult::error(format!(
                        "Security check failed: {}",
                        dir_finding.message.unwrap_or_default()
                    )));
                }
                let resolved = self.security.resolve(dir);
                if !resolved.is_dir() {
                    return Ok(ToolResult::error(format!(
                        "Working directory not found: {dir}"
                    )));
                }
                resolved
            }
            None => self.security.scope().cwd.clone(),
        };

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command = %command, timeout_secs, cwd = %working_dir.display(), "running shell command");

        let output =
            match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Ok(ToolResult::error(format!("Failed to execute command: {e}")));
                }
                Err(_) => {
                    return Ok(ToolResult::error(format!(
                        "Command timed out after {timeout_secs} seconds"
                    )));
                }
            };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push('\n');
            combined.push_str(&stderr);
        }
        let sanitized = sanitize_output(&combined, MAX_OUTPUT_CHARS);

        let mut result = match output.status.code() {
            Some(0) => ToolResult::success(sanitized),
            Some(code) => {
                ToolResult::error(format!("Command exited with code {code}")).with_output(sanitized)
            }
            None => ToolResult::error("Command terminated by signal").with_output(sanitized),
        };
        result = result
            .with_metadata("return_code", output.status.code().unwrap_or(-1))
            .with_metadata("command", command)
            .with_metadata("working_dir", working_dir.display().to_string());
        if let Some(warning) = finding.message {
            result = result.with_metadata("warning", warning);
        }
        Ok(result)
    }
}
