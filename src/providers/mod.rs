//! Model inference backend.
//!
//! The agent talks to the model through the [`LlmClient`] trait defined in
//! [`traits`]. [`OllamaClient`](ollama::OllamaClient) is the only production
//! implementation: a non-streaming `/api/chat` client with connection-failure
//! retry, exponential backoff and classified [`ProviderError`]s.
//!
//! Use [`create_client`] to build one from the loaded configuration.

pub mod error;
pub mod ollama;
pub mod traits;

pub use error::ProviderError;
pub use ollama::OllamaClient;
pub use traits::{
    ChatRequest, ChatResponse, LlmClient, Message, ModelInfo, Role, TokenUsage, ToolCall,
};

use crate::config::Config;
use std::time::Duration;

/// Factory: Ollama client configured from `[ollama]` and `[reliability]`.
pub fn create_client(config: &Config) -> OllamaClient {
    OllamaClient::new(&config.ollama.url, &config.ollama.model)
        .with_timeouts(
            Duration::from_secs(config.ollama.timeout_secs),
            Duration::from_secs(config.ollama.probe_timeout_secs),
        )
        .with_retry(config.reliability.retries, config.reliability.backoff_ms)
}
