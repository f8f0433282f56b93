//! Permission gate for side-effecting tool calls.
//!
//! Decides per invocation whether a tool may run, based on the current
//! [`PermissionMode`] and a session-scoped approval set built from
//! "always approve" answers. Every decision lands in an audit log.

use chrono::Utc;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Audit entries kept per session; older ones are dropped first.
pub const MAX_AUDIT_ENTRIES: usize = 1000;

// ── Types ────────────────────────────────────────────────────────

/// How tool calls that need permission are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Ask the user.
    #[default]
    Interactive,
    /// Allow everything without asking.
    AutoApprove,
    /// No user present; deny everything that needs permission.
    Headless,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Interactive => "interactive",
            PermissionMode::AutoApprove => "auto_approve",
            PermissionMode::Headless => "headless",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "interactive" => Ok(PermissionMode::Interactive),
            "auto_approve" | "auto" => Ok(PermissionMode::AutoApprove),
            "headless" => Ok(PermissionMode::Headless),
            other => anyhow::bail!(
                "Unknown permission mode '{other}'. Use interactive, auto_approve or headless"
            ),
        }
    }
}

/// What an "always approve" answer covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    /// Every later call of the same tool.
    #[default]
    Tool,
    /// Later calls of the same tool with identical arguments.
    ToolAndArguments,
}

/// Outcome recorded for a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Approved,
    ApprovedForSession,
    PreviouslyApproved,
    AutoApproved,
    Denied,
    HeadlessDenied,
    Cancelled,
}

impl PermissionDecision {
    pub fn is_allowed(self) -> bool {
        matches!(
            self,
            PermissionDecision::Approved
                | PermissionDecision::ApprovedForSession
                | PermissionDecision::PreviouslyApproved
                | PermissionDecision::AutoApproved
        )
    }
}

/// A single audit log entry for a permission decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionLogEntry {
    pub timestamp: String,
    pub tool_name: String,
    pub action: String,
    pub mode: PermissionMode,
    pub decision: PermissionDecision,
}

// ── Prompting ────────────────────────────────────────────────────

/// User interaction behind interactive mode.
pub trait Prompter: Send + Sync {
    /// Present the request before any question is asked.
    fn show_request(&self, tool_name: &str, action: &str, metadata: &serde_json::Value);

    /// Yes/no question. Errors (closed stdin, interrupted prompt) count as "no".
    fn confirm(&self, prompt: &str, default: bool) -> anyhow::Result<bool>;
}

/// Prompts on the controlling terminal with `dialoguer`.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn show_request(&self, tool_name: &str, action: &str, metadata: &serde_json::Value) {
        use console::style;

        eprintln!();
        eprintln!("{}", style("🔐 Permission Request").yellow());
        eprintln!("{} {tool_name}", style("Tool:").cyan());
        eprintln!("{} {action}", style("Action:").cyan());
        if let serde_json::Value::Object(map) = metadata {
            for (key, value) in map {
                let rendered = match value {
                    serde_json::Value::String(s) => crate::util::truncate_with_ellipsis(s, 200),
                    other => crate::util::truncate_with_ellipsis(&other.to_string(), 200),
                };
                eprintln!("{} {rendered}", style(format!("{key}:")).cyan());
            }
        }
    }

    fn confirm(&self, prompt: &str, default: bool) -> anyhow::Result<bool> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }
}

// ── PermissionManager ────────────────────────────────────────────

pub struct PermissionManager {
    mode: Mutex<PermissionMode>,
    scope: ApprovalScope,
    prompter: Box<dyn Prompter>,
    /// Keys built from "always approve" answers, shaped by `scope`.
    session_approvals: Mutex<HashSet<String>>,
    audit_log: Mutex<VecDeque<PermissionLogEntry>>,
}

impl PermissionManager {
    pub fn new(mode: PermissionMode, scope: ApprovalScope, prompter: Box<dyn Prompter>) -> Self {
        Self {
            mode: Mutex::new(mode),
            scope,
            prompter,
            session_approvals: Mutex::new(HashSet::new()),
            audit_log: Mutex::new(VecDeque::new()),
        }
    }

    /// Manager that prompts on the terminal.
    pub fn terminal(mode: PermissionMode, scope: ApprovalScope) -> Self {
        Self::new(mode, scope, Box::new(TerminalPrompter))
    }

    pub fn mode(&self) -> PermissionMode {
        *self.mode.lock()
    }

    /// Takes effect for the next request. Session approvals are kept.
    pub fn set_mode(&self, mode: PermissionMode) {
        *self.mode.lock() = mode;
        tracing::info!(mode = %mode, "permission mode changed");
    }

    pub fn scope(&self) -> ApprovalScope {
        self.scope
    }

    pub fn clear_session_approvals(&self) {
        self.session_approvals.lock().clear();
    }

    /// Whether a call would pass without prompting.
    pub fn is_auto_approved(&self, tool_name: &str, arguments: &serde_json::Value) -> bool {
        self.mode() == PermissionMode::AutoApprove
            || self
                .session_approvals
                .lock()
                .contains(&self.approval_key(tool_name, arguments))
    }

    /// Decide whether `tool_name` may run. `arguments` are shown to the user
    /// and, under [`ApprovalScope::ToolAndArguments`], part of the session key.
    pub fn request_permission(
        &self,
        tool_name: &str,
        action: &str,
        arguments: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> bool {
        let decision = self.decide(tool_name, action, arguments, cancel);
        self.record(tool_name, action, decision);
        decision.is_allowed()
    }

    fn decide(
        &self,
        tool_name: &str,
        action: &str,
        arguments: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> PermissionDecision {
        if cancel.is_cancelled() {
            return PermissionDecision::Cancelled;
        }

        match self.mode() {
            PermissionMode::AutoApprove => return PermissionDecision::AutoApproved,
            PermissionMode::Headless => return PermissionDecision::HeadlessDenied,
            PermissionMode::Interactive => {}
        }

        let key = self.approval_key(tool_name, arguments);
        if self.session_approvals.lock().contains(&key) {
            return PermissionDecision::PreviouslyApproved;
        }

        self.prompter.show_request(tool_name, action, arguments);
        let approved = self
            .prompter
            .confirm("Allow this action?", true)
            .unwrap_or_else(|e| {
                tracing::debug!("permission prompt aborted: {e}");
                false
            });
        if !approved {
            return PermissionDecision::Denied;
        }
        // Ctrl-C while the first prompt was open.
        if cancel.is_cancelled() {
            return PermissionDecision::Cancelled;
        }

        let always = self
            .prompter
            .confirm(
                &format!("Always approve '{tool_name}' for this session?"),
                false,
            )
            .unwrap_or(false);
        if always {
            self.session_approvals.lock().insert(key);
            PermissionDecision::ApprovedForSession
        } else {
            PermissionDecision::Approved
        }
    }

    fn approval_key(&self, tool_name: &str, arguments: &serde_json::Value) -> String {
        match self.scope {
            ApprovalScope::Tool => tool_name.to_string(),
            ApprovalScope::ToolAndArguments => {
                format!("{tool_name}\u{0}{}", canonical_json(arguments))
            }
        }
    }

    fn record(&self, tool_name: &str, action: &str, decision: PermissionDecision) {
        let mode = self.mode();
        tracing::info!(tool = tool_name, action, %mode, ?decision, "permission decision");
        let mut log = self.audit_log.lock();
        if log.len() >= MAX_AUDIT_ENTRIES {
            log.pop_front();
        }
        log.push_back(PermissionLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            tool_name: tool_name.to_string(),
            action: action.to_string(),
            mode,
            decision,
        });
    }

    /// Snapshot of the audit log.
    pub fn audit_log(&self) -> Vec<PermissionLogEntry> {
        self.audit_log.lock().iter().cloned().collect()
    }

    /// Snapshot of the session approval keys.
    pub fn session_approvals(&self) -> HashSet<String> {
        self.session_approvals.lock().clone()
    }
}

/// JSON rendering with object keys sorted at every level.
fn canonical_json(value: &serde_json::Value) -> String {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                serde_json::Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), sorted(v)))
                        .collect(),
                )
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Answers questions from a fixed script and records what was asked.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedPrompter {
        answers: Arc<Mutex<VecDeque<bool>>>,
        pub(crate) asked: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedPrompter {
        pub(crate) fn new(answers: &[bool]) -> Self {
            Self {
                answers: Arc::new(Mutex::new(answers.iter().copied().collect())),
                asked: Arc::default(),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn show_request(&self, _tool_name: &str, _action: &str, _metadata: &serde_json::Value) {}

        fn confirm(&self, prompt: &str, _default: bool) -> anyhow::Result<bool> {
            self.asked.lock().push(prompt.to_string());
            self.answers
                .lock()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted answer"))
        }
    }

    fn manager(mode: PermissionMode, scope: ApprovalScope, answers: &[bool]) -> (PermissionManager, ScriptedPrompter) {
        let prompter = ScriptedPrompter::new(answers);
        (
            PermissionManager::new(mode, scope, Box::new(prompter.clone())),
            prompter,
        )
    }

    fn ask(mgr: &PermissionManager, tool: &str, args: serde_json::Value) -> bool {
        mgr.request_permission(tool, &format!("Execute {tool}"), &args, &CancellationToken::new())
    }

    // ── modes ────────────────────────────────────────────────

    #[test]
    fn auto_approve_never_prompts() {
        let (mgr, prompter) = manager(PermissionMode::AutoApprove, ApprovalScope::Tool, &[]);
        assert!(ask(&mgr, "Bash", json!({"command": "ls"})));
        assert!(prompter.asked.lock().is_empty());
    }

    #[test]
    fn headless_denies_without_prompt() {
        let (mgr, prompter) = manager(PermissionMode::Headless, ApprovalScope::Tool, &[]);
        assert!(!ask(&mgr, "Write", json!({})));
        assert!(prompter.asked.lock().is_empty());
        assert_eq!(mgr.audit_log()[0].decision, PermissionDecision::HeadlessDenied);
    }

    #[test]
    fn cancelled_token_denies_before_prompt() {
        let (mgr, prompter) = manager(PermissionMode::AutoApprove, ApprovalScope::Tool, &[true]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!mgr.request_permission("Bash", "Execute command: ls", &json!({}), &cancel));
        assert!(prompter.asked.lock().is_empty());
        assert_eq!(mgr.audit_log()[0].decision, PermissionDecision::Cancelled);
    }

    // ── interactive ──────────────────────────────────────────

    #[test]
    fn interactive_yes_then_not_always_asks_again_next_time() {
        let (mgr, prompter) = manager(
            PermissionMode::Interactive,
            ApprovalScope::Tool,
            &[true, false, true, false],
        );
        assert!(ask(&mgr, "Edit", json!({})));
        assert!(ask(&mgr, "Edit", json!({})));
        assert_eq!(
            *prompter.asked.lock(),
            [
                "Allow this action?",
                "Always approve 'Edit' for this session?",
                "Allow this action?",
                "Always approve 'Edit' for this session?",
            ]
        );
    }

    #[test]
    fn interactive_denial_skips_second_question() {
        let (mgr, prompter) = manager(PermissionMode::Interactive, ApprovalScope::Tool, &[false]);
        assert!(!ask(&mgr, "Bash", json!({})));
        assert_eq!(prompter.asked.lock().len(), 1);
        assert!(mgr.session_approvals().is_empty());
    }

    #[test]
    fn always_approve_covers_later_calls_of_the_tool() {
        let (mgr, prompter) = manager(PermissionMode::Interactive, ApprovalScope::Tool, &[true, true]);
        assert!(ask(&mgr, "Bash", json!({"command": "ls"})));
        assert!(ask(&mgr, "Bash", json!({"command": "pwd"})));
        assert_eq!(prompter.asked.lock().len(), 2);
        assert!(mgr.is_auto_approved("Bash", &json!({})));
        assert!(!mgr.is_auto_approved("Write", &json!({})));
    }

    #[test]
    fn argument_scope_only_covers_identical_arguments() {
        let (mgr, prompter) = manager(
            PermissionMode::Interactive,
            ApprovalScope::ToolAndArguments,
            &[true, true, true, false],
        );
        assert!(ask(&mgr, "Bash", json!({"command": "ls", "timeout": 5})));
        // Same arguments, different key order.
        assert!(ask(&mgr, "Bash", json!({"timeout": 5, "command": "ls"})));
        assert_eq!(prompter.asked.lock().len(), 2);

        assert!(ask(&mgr, "Bash", json!({"command": "pwd"})));
        assert_eq!(prompter.asked.lock().len(), 4);
    }

    #[test]
    fn prompt_failure_counts_as_denial() {
        let (mgr, _) = manager(PermissionMode::Interactive, ApprovalScope::Tool, &[]);
        assert!(!ask(&mgr, "Write", json!({})));
        assert_eq!(mgr.audit_log()[0].decision, PermissionDecision::Denied);
    }

    // ── mode switching ───────────────────────────────────────

    #[test]
    fn set_mode_keeps_session_approvals() {
        let (mgr, _) = manager(PermissionMode::Interactive, ApprovalScope::Tool, &[true, true]);
        assert!(ask(&mgr, "Git", json!({})));
        mgr.set_mode(PermissionMode::Headless);
        assert!(!ask(&mgr, "Git", json!({})));
        mgr.set_mode(PermissionMode::Interactive);
        assert!(ask(&mgr, "Git", json!({})));
        assert_eq!(mgr.mode(), PermissionMode::Interactive);
    }

    #[test]
    fn clear_session_approvals_forces_prompt_again() {
        let (mgr, prompter) = manager(
            PermissionMode::Interactive,
            ApprovalScope::Tool,
            &[true, true, false],
        );
        assert!(ask(&mgr, "Write", json!({})));
        mgr.clear_session_approvals();
        assert!(!ask(&mgr, "Write", json!({})));
        assert_eq!(prompter.asked.lock().len(), 3);
    }

    #[test]
    fn audit_log_records_each_decision() {
        let (mgr, _) = manager(PermissionMode::AutoApprove, ApprovalScope::Tool, &[]);
        ask(&mgr, "Bash", json!({}));
        ask(&mgr, "Write", json!({}));
        let log = mgr.audit_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].tool_name, "Write");
        assert_eq!(log[1].action, "Execute Write");
        assert_eq!(log[1].decision, PermissionDecision::AutoApproved);
        assert!(chrono::DateTime::parse_from_rfc3339(&log[0].timestamp).is_ok());
    }

    #[test]
    fn audit_log_keeps_only_the_newest_entries() {
        let (mgr, _) = manager(PermissionMode::AutoApprove, ApprovalScope::Tool, &[]);
        for i in 0..MAX_AUDIT_ENTRIES + 5 {
            ask(&mgr, &format!("Tool{i}"), json!({}));
        }
        let log = mgr.audit_log();
        assert_eq!(log.len(), MAX_AUDIT_ENTRIES);
        assert_eq!(log[0].tool_name, "Tool5");
        assert_eq!(
            log.last().unwrap().tool_name,
            format!("Tool{}", MAX_AUDIT_ENTRIES + 4)
        );
    }

    // ── parsing ──────────────────────────────────────────────

    #[test]
    fn mode_parses_and_serializes_snake_case() {
        assert_eq!("auto-approve".parse::<PermissionMode>().unwrap(), PermissionMode::AutoApprove);
        assert_eq!("HEADLESS".parse::<PermissionMode>().unwrap(), PermissionMode::Headless);
        assert!("yolo".parse::<PermissionMode>().is_err());
        assert_eq!(
            serde_json::to_string(&PermissionMode::AutoApprove).unwrap(),
            "\"auto_approve\""
        );
        assert_eq!(
            serde_json::to_string(&ApprovalScope::ToolAndArguments).unwrap(),
            "\"tool_and_arguments\""
        );
    }
}
