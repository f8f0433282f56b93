use crate::agent::parsing::{assign_unique_ids, extract_tool_calls, from_native};
use crate::agent::prompt::{PromptContext, SystemPromptBuilder};
use crate::approval::{PermissionManager, PermissionMode};
use crate::config::AgentConfig;
use crate::providers::{ChatRequest, LlmClient, Message, Role, ToolCall};
use crate::session::{is_valid_session_id, new_session_id, InMemorySessionStore, SessionStore};
use crate::tools::{ToolRegistry, ToolResult};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const ITERATION_LIMIT_MESSAGE: &str =
    "Maximum iteration limit reached. Please try breaking down your request.";
const PERMISSION_DENIED_MESSAGE: &str = "Permission denied by user";

/// Counters for one `run` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    pub time_taken: Duration,
    pub tokens: u64,
    pub llm_calls: usize,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { text: String, metrics: RunMetrics },
    Interrupted { metrics: RunMetrics },
}

impl RunOutcome {
    pub fn metrics(&self) -> &RunMetrics {
        match self {
            RunOutcome::Completed { metrics, .. } | RunOutcome::Interrupted { metrics } => metrics,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            RunOutcome::Completed { text, .. } => Some(text),
            RunOutcome::Interrupted { .. } => None,
        }
    }
}

/// How full the context window is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextInfo {
    pub message_count: usize,
    pub limit: usize,
    pub remaining: usize,
    pub percentage: f64,
}

pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    tool_schemas: Vec<Value>,
    permissions: Arc<PermissionManager>,
    store: Arc<dyn SessionStore>,
    session_id: String,
    system_prompt: String,
    config: AgentConfig,
    temperature: f64,
    max_tokens: Option<u32>,
    history: Vec<Message>,
}

#[derive(Default)]
pub struct AgentBuilder {
    llm: Option<Arc<dyn LlmClient>>,
    tools: Option<ToolRegistry>,
    permissions: Option<Arc<PermissionManager>>,
    store: Option<Arc<dyn SessionStore>>,
    session_id: Option<String>,
    system_prompt: Option<String>,
    workspace_dir: Option<PathBuf>,
    config: Option<AgentConfig>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn permissions(mut self, permissions: Arc<PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Use a fixed system prompt instead of assembling the default one.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn workspace_dir(mut self, dir: PathBuf) -> Self {
        self.workspace_dir = Some(dir);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let llm = self
            .llm
            .ok_or_else(|| anyhow::anyhow!("llm client is required"))?;
        let tools = self
            .tools
            .ok_or_else(|| anyhow::anyhow!("tools are required"))?;
        let permissions = self
            .permissions
            .ok_or_else(|| anyhow::anyhow!("permission manager is required"))?;
        let config = self.config.unwrap_or_default();
        let session_id = self.session_id.unwrap_or_else(new_session_id);
        if !is_valid_session_id(&session_id) {
            anyhow::bail!(
                "Invalid session id '{session_id}': use letters, digits, '-', '_' or '.', not starting with '.'"
            );
        }

        let system_prompt = match self.system_prompt {
            Some(prompt) => prompt,
            None => {
                let workspace_dir = self
                    .workspace_dir
                    .unwrap_or_else(|| PathBuf::from("."));
                let ctx = PromptContext {
                    workspace_dir: &workspace_dir,
                    model_name: llm.model(),
                    tools: &tools,
                    native_tools: config.tools_enabled,
                    specialization: config.specialization,
                };
                SystemPromptBuilder::with_defaults().build(&ctx)?
            }
        };

        Ok(Agent {
            tool_schemas: tools.schemas(),
            llm,
            tools,
            permissions,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
            session_id,
            system_prompt,
            config,
            temperature: self.temperature.unwrap_or(0.7),
            max_tokens: self.max_tokens,
            history: Vec::new(),
        })
    }
}

/// Text shown to the user when a tool asks for permission.
pub fn describe_action(tool_name: &str, arguments: &Value) -> String {
    let arg = |key: &str| arguments.get(key).and_then(Value::as_str).unwrap_or("");
    match tool_name {
        "Write" => format!("Write to file: {}", arg("file_path")),
        "Edit" => format!("Edit file: {}", arg("file_path")),
        "Bash" => format!("Execute command: {}", arg("command")),
        "Git" => format!("Git {}", arg("operation")),
        other => format!("Execute {other}"),
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.permissions.mode()
    }

    /// Takes effect from the next permission check; session approvals are kept.
    pub fn set_permission_mode(&self, mode: PermissionMode) {
        self.permissions.set_mode(mode);
    }

    /// Load the stored conversation for this session id. Returns the number
    /// of messages restored.
    pub async fn restore_session(&mut self) -> usize {
        self.history = self.store.load(&self.session_id).await;
        if !self.history.is_empty() {
            tracing::info!(
                session_id = %self.session_id,
                messages = self.history.len(),
                "restored conversation"
            );
        }
        self.history.len()
    }

    /// Forget the conversation, its stored copy and all session approvals.
    pub async fn reset_session(&mut self) {
        self.history.clear();
        if !self.store.clear(&self.session_id).await {
            tracing::warn!(session_id = %self.session_id, "failed to clear stored conversation");
        }
        self.permissions.clear_session_approvals();
    }

    pub fn context_info(&self) -> ContextInfo {
        let message_count = self.history.len();
        let limit = self.config.context_limit;
        let percentage = if limit == 0 {
            100.0
        } else {
            (message_count as f64 / limit as f64 * 100.0).min(100.0)
        };
        ContextInfo {
            message_count,
            limit,
            remaining: limit.saturating_sub(message_count),
            percentage,
        }
    }

    /// Process one user request until the model answers without tool calls,
    /// the iteration bound is hit, or `cancel` fires.
    ///
    /// Cancellation is checked before every model call and before every tool
    /// call. In-flight requests and tool executions are never interrupted.
    pub async fn run(&mut self, user_text: &str, cancel: &CancellationToken) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut metrics = RunMetrics::default();

        self.append(Message::user(user_text)).await;

        while metrics.iterations < self.config.max_iterations {
            if cancel.is_cancelled() {
                tracing::info!("run interrupted before model call");
                metrics.time_taken = started.elapsed();
                return Ok(RunOutcome::Interrupted { metrics });
            }
            metrics.iterations += 1;

            let messages = self.request_messages();
            let tools = self
                .config
                .tools_enabled
                .then_some(self.tool_schemas.as_slice());
            tracing::debug!(
                iteration = metrics.iterations,
                messages = messages.len(),
                "calling model"
            );
            let response = self
                .llm
                .chat(ChatRequest {
                    messages: &messages,
                    tools,
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                })
                .await?;
            metrics.llm_calls += 1;
            if let Some(usage) = &response.usage {
                metrics.tokens += usage.total();
            }

            let text = response.text.clone().unwrap_or_default();
            let native = !response.tool_calls.is_empty();
            let mut calls = if native {
                from_native(response.tool_calls)
            } else {
                extract_tool_calls(&text)
            };

            if calls.is_empty() {
                self.append(Message::assistant(text.clone())).await;
                metrics.time_taken = started.elapsed();
                return Ok(RunOutcome::Completed { text, metrics });
            }

            assign_unique_ids(&mut calls, &self.used_call_ids());
            tracing::debug!(count = calls.len(), native, "model requested tool calls");

            // Text that carried recovered calls is kept in history only.
            let mut leading_text = text;
            if !native && !leading_text.trim().is_empty() {
                self.append(Message::assistant(std::mem::take(&mut leading_text)))
                    .await;
            }

            for call in calls {
                if cancel.is_cancelled() {
                    tracing::info!(tool = %call.name, "skipping remaining tool calls after interrupt");
                    break;
                }
                let result = self.execute_call(&call, cancel).await;
                self.append(Message::assistant_tool_calls(
                    std::mem::take(&mut leading_text),
                    vec![call.clone()],
                ))
                .await;
                self.append(Message::tool(result.to_wire(), call.id)).await;
            }
        }

        metrics.time_taken = started.elapsed();
        if cancel.is_cancelled() {
            tracing::info!("run interrupted on the last iteration");
            return Ok(RunOutcome::Interrupted { metrics });
        }

        tracing::warn!(
            max_iterations = self.config.max_iterations,
            "iteration limit reached"
        );
        Ok(RunOutcome::Completed {
            text: ITERATION_LIMIT_MESSAGE.to_string(),
            metrics,
        })
    }

    async fn execute_call(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(tool = %call.name, "model requested unknown tool");
            return ToolResult::error(format!("Unknown tool: {}", call.name));
        };

        if tool.requires_permission() {
            let action = describe_action(&call.name, &call.arguments);
            if !self
                .permissions
                .request_permission(&call.name, &action, &call.arguments, cancel)
            {
                return ToolResult::permission_denied(PERMISSION_DENIED_MESSAGE);
            }
        }

        tracing::info!(tool = %call.name, id = %call.id, "executing tool");
        match tool.execute(call.arguments.clone()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(tool = %call.name, "tool failed: {e:#}");
                ToolResult::error(format!("Error executing {}: {e}", call.name))
            }
        }
    }

    fn request_messages(&self) -> Vec<Message> {
        let start = self
            .history
            .len()
            .saturating_sub(self.config.context_limit);
        let mut window = &self.history[start..];
        // A tool result whose assistant call fell outside the window is orphaned.
        while window.first().is_some_and(|m| m.role == Role::Tool) {
            window = &window[1..];
        }

        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(
            window
                .iter()
                .filter(|m| {
                    self.config.tools_enabled || (m.role != Role::Tool && !m.has_tool_calls())
                })
                .cloned(),
        );
        messages
    }

    fn used_call_ids(&self) -> HashSet<String> {
        self.history
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect()
    }

    async fn append(&mut self, message: Message) {
        self.history.push(message);
        if !self.store.save(&self.session_id, &self.history).await {
            tracing::warn!(session_id = %self.session_id, "failed to persist conversation");
        }
    }
}
