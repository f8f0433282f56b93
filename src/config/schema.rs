use crate::agent::prompt::Specialization;
use crate::approval::{ApprovalScope, PermissionMode};
use crate::providers::ollama::{
    DEFAULT_BACKOFF_MS, DEFAULT_BASE_URL, DEFAULT_CHAT_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MODEL, DEFAULT_PROBE_TIMEOUT_SECS,
};
use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level ────────────────────────────────────────────────────

/// Top-level flaco configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Ollama endpoint and model settings (`[ollama]`).
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Retry behaviour for unreachable servers (`[reliability]`).
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Agent loop limits (`[agent]`).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool permission handling (`[permissions]`).
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Conversation persistence (`[storage]`).
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        let config_path = default_config_dir()
            .unwrap_or_else(|_| PathBuf::from(".flaco"))
            .join(CONFIG_FILE_NAME);
        Self {
            config_path,
            ollama: OllamaConfig::default(),
            reliability: ReliabilityConfig::default(),
            agent: AgentConfig::default(),
            permissions: PermissionsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

// ── Ollama ───────────────────────────────────────────────────────

/// Ollama server settings (`[ollama]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server.
    #[serde(default = "default_ollama_url")]
    pub url: String,
    /// Model used for chat requests.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature (0.0-2.0).
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Cap on generated tokens per response (`num_predict`). Unset means model default.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Chat request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Reachability probe timeout in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_ollama_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout_secs() -> u64 {
    DEFAULT_CHAT_TIMEOUT_SECS
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

// ── Reliability ──────────────────────────────────────────────────

/// Reliability configuration (`[reliability]` section).
///
/// Only connection failures are retried; timeouts and HTTP errors fail fast.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReliabilityConfig {
    /// Total attempts when the server cannot be reached.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base backoff (ms); doubles after every failed attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_retries() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// ── Agent ────────────────────────────────────────────────────────

/// Agent loop configuration (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Maximum model round trips per user request.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Number of most recent messages sent with each request.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    /// Send tool schemas to the model. When off, tool calls are only
    /// recovered from response text and tool history is not replayed.
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
    /// Extra system prompt section focusing the assistant on one area.
    #[serde(default)]
    pub specialization: Specialization,
}

fn default_max_iterations() -> usize {
    10
}

fn default_context_limit() -> usize {
    120
}

fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context_limit: default_context_limit(),
            tools_enabled: true,
            specialization: Specialization::default(),
        }
    }
}

// ── Permissions ──────────────────────────────────────────────────

/// Permission configuration (`[permissions]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PermissionsConfig {
    /// `interactive`, `auto_approve` or `headless`.
    #[serde(default)]
    pub mode: PermissionMode,
    /// What an "always approve" answer covers: `tool` or `tool_and_arguments`.
    #[serde(default)]
    pub approval_scope: ApprovalScope,
}

// ── Storage ──────────────────────────────────────────────────────

/// Conversation storage (`[storage]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    /// Persist conversations to disk. When off they live only in memory.
    #[serde(default = "default_true")]
    pub persist_sessions: bool,
    /// Data directory; `~` is expanded. Defaults to `<config dir>/data`.
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist_sessions: true,
            data_dir: None,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".flaco"))
}

/// `FLACO_CONFIG_DIR` when set, otherwise `~/.flaco`.
pub fn resolve_config_dir() -> Result<PathBuf> {
    match std::env::var("FLACO_CONFIG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            Ok(PathBuf::from(shellexpand::tilde(dir.trim()).into_owned()))
        }
        _ => default_config_dir(),
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load `config.toml` from the resolved config dir, creating it with
    /// defaults on first run.
    pub async fn load_or_init() -> Result<Self> {
        let dir = resolve_config_dir()?;
        Self::load_or_init_in(&dir).await
    }

    pub async fn load_or_init_in(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config {
                config_path,
                ..Config::default()
            };
            config.save().await?;
            tracing::info!(path = %config.config_path.display(), "created default config");
            Ok(config)
        }
    }

    /// Atomic save: write to .tmp then rename.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let toml = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let tmp = self.config_path.with_extension("toml.tmp");
        fs::write(&tmp, toml)
            .await
            .context("Failed to write config file")?;
        fs::rename(&tmp, &self.config_path)
            .await
            .context("Failed to replace config file")?;
        Ok(())
    }

    /// Environment variables win over the file. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        // Ollama URL: FLACO_OLLAMA_URL or OLLAMA_HOST
        if let Some(url) = env_nonempty("FLACO_OLLAMA_URL").or_else(|| env_nonempty("OLLAMA_HOST")) {
            self.ollama.url = url;
        }

        if let Some(model) = env_nonempty("FLACO_MODEL") {
            self.ollama.model = model;
        }

        if let Some(raw) = env_nonempty("FLACO_CONTEXT_LIMIT") {
            match raw.parse::<usize>() {
                Ok(limit) if limit > 0 => self.agent.context_limit = limit,
                _ => tracing::warn!(value = %raw, "ignoring invalid FLACO_CONTEXT_LIMIT"),
            }
        }

        if let Some(raw) = env_nonempty("FLACO_MAX_ITERATIONS") {
            match raw.parse::<usize>() {
                Ok(max) if max > 0 => self.agent.max_iterations = max,
                _ => tracing::warn!(value = %raw, "ignoring invalid FLACO_MAX_ITERATIONS"),
            }
        }

        if let Some(raw) = env_nonempty("FLACO_PERMISSION_MODE") {
            match raw.parse::<PermissionMode>() {
                Ok(mode) => self.permissions.mode = mode,
                Err(e) => tracing::warn!("ignoring FLACO_PERMISSION_MODE: {e}"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.ollama.temperature) {
            anyhow::bail!(
                "ollama.temperature must be between 0.0 and 2.0 (got {})",
                self.ollama.temperature
            );
        }
        if self.ollama.model.trim().is_empty() {
            anyhow::bail!("ollama.model must not be empty");
        }
        if self.ollama.timeout_secs == 0 || self.ollama.probe_timeout_secs == 0 {
            anyhow::bail!("ollama timeouts must be at least one second");
        }
        if self.agent.max_iterations == 0 {
            anyhow::bail!("agent.max_iterations must be at least 1");
        }
        if self.agent.context_limit == 0 {
            anyhow::bail!("agent.context_limit must be at least 1");
        }
        Ok(())
    }

    /// Directory holding `conversations/`.
    pub fn data_dir(&self) -> PathBuf {
        match self.storage.data_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(shellexpand::tilde(dir).into_owned()),
            _ => self
                .config_path
                .parent()
                .map_or_else(|| PathBuf::from(".flaco"), Path::to_path_buf)
                .join("data"),
        }
    }

    /// JSON Schema of the config file.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}
