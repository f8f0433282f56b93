use crate::providers::error::ProviderError;
use crate::providers::traits::{
    ChatRequest, ChatResponse, LlmClient, Message, ModelInfo, Role, TokenUsage, ToolCall,
};
use crate::util::truncate_with_ellipsis;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";
pub const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 1_000;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Client for a local or remote Ollama server.
///
/// One `reqwest::Client` is shared by every call so connections are pooled.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    chat_timeout: Duration,
    probe_timeout: Duration,
    max_attempts: u32,
    backoff_ms: u64,
}

// ─── Request Structures ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: Options,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OutgoingToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutgoingToolCall {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OutgoingFunction,
}

#[derive(Debug, Serialize)]
struct OutgoingFunction {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

// ─── Response Structures ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
    /// Some models return a "thinking" field with internal reasoning
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    id: Option<String>,
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

// ─── Implementation ───────────────────────────────────────────────────────────

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

impl OllamaClient {
    fn normalize_base_url(raw_url: &str) -> String {
        let trimmed = raw_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return DEFAULT_BASE_URL.to_string();
        }

        trimmed
            .strip_suffix("/api")
            .unwrap_or(trimmed)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: Self::normalize_base_url(base_url),
            model: model.trim().to_string(),
            chat_timeout: Duration::from_secs(DEFAULT_CHAT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }

    pub fn with_timeouts(mut self, chat: Duration, probe: Duration) -> Self {
        self.chat_timeout = chat;
        self.probe_timeout = probe;
        self
    }

    /// Total attempts for connection failures (at least one) and the base delay.
    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, err: &reqwest::Error, timeout: Duration) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                secs: timeout.as_secs(),
                model: self.model.clone(),
            }
        } else if err.is_connect() {
            ProviderError::ConnectionFailure {
                url: self.base_url.clone(),
                attempts: 1,
            }
        } else {
            ProviderError::Transport(err.to_string())
        }
    }

    /// Convert conversation history to Ollama's native tool-call message schema.
    ///
    /// Ollama links tool results by function name, so ids recorded on assistant
    /// turns are mapped back to names for the following `tool` messages.
    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        let mut tool_name_by_id: HashMap<&str, &str> = HashMap::new();

        messages
            .iter()
            .map(|message| {
                let tool_calls = message.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|call| {
                            tool_name_by_id.insert(call.id.as_str(), call.name.as_str());
                            OutgoingToolCall {
                                kind: "function",
                                function: OutgoingFunction {
                                    name: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                },
                            }
                        })
                        .collect()
                });

                let tool_name = if message.role == Role::Tool {
                    message
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| tool_name_by_id.get(id))
                        .map(|name| (*name).to_string())
                } else {
                    None
                };

                WireMessage {
                    role: message.role.as_str(),
                    content: message.content.clone(),
                    tool_calls,
                    tool_name,
                }
            })
            .collect()
    }

    fn build_chat_request(&self, request: &ChatRequest<'_>) -> ApiChatRequest {
        ApiChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(request.messages),
            stream: false,
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
            tools: request
                .tools
                .filter(|tools| !tools.is_empty())
                .map(<[serde_json::Value]>::to_vec),
        }
    }

    async fn send_once(&self, url: &str, body: &ApiChatRequest) -> Result<ApiChatResponse, ProviderError> {
        let response = self
            .client
            .post(url)
            .timeout(self.chat_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(&e, self.chat_timeout))?;

        let status = response.status();
        tracing::debug!("Ollama response status: {}", status);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.classify(&e, self.chat_timeout))?;

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::ModelNotFound {
                model: self.model.clone(),
            });
        }
        if !status.is_success() {
            let raw = String::from_utf8_lossy(&bytes);
            let body = truncate_with_ellipsis(raw.trim(), MAX_ERROR_BODY_CHARS);
            tracing::error!(status = status.as_u16(), body_excerpt = %body, "Ollama error response");
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::error!("Ollama response deserialization failed: {e}");
            ProviderError::InvalidResponse(e.to_string())
        })
    }

    /// POST `/api/chat`, retrying connection failures with exponential backoff.
    async fn send_request(&self, body: &ApiChatRequest) -> Result<ApiChatResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        tracing::debug!(
            "Ollama request: url={} model={} message_count={} temperature={} tool_count={}",
            url,
            body.model,
            body.messages.len(),
            body.options.temperature,
            body.tools.as_ref().map_or(0, Vec::len),
        );

        let mut attempt = 0u32;
        loop {
            match self.send_once(&url, body).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(ProviderError::ConnectionFailure {
                            url: self.base_url.clone(),
                            attempts: self.max_attempts,
                        });
                    }
                    let wait = backoff_delay(self.backoff_ms, attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Ollama unreachable, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn into_chat_response(response: ApiChatResponse) -> ChatResponse {
        let usage = if response.prompt_eval_count.is_some() || response.eval_count.is_some() {
            Some(TokenUsage {
                input_tokens: response.prompt_eval_count,
                output_tokens: response.eval_count,
            })
        } else {
            None
        };

        let message = response.message;
        if message.content.is_empty() && message.tool_calls.is_empty() {
            if let Some(thinking) = &message.thinking {
                tracing::warn!(
                    "Ollama returned empty content with only thinking: '{}'. Model may have stopped prematurely.",
                    truncate_with_ellipsis(thinking, 100)
                );
            } else {
                tracing::warn!("Ollama returned empty content with no tool calls");
            }
        }

        // Ids and wrapper names are normalized by the agent's extractor.
        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall::new(tc.id.unwrap_or_default(), tc.function.name, tc.function.arguments))
            .collect();

        ChatResponse {
            text: (!message.content.is_empty()).then_some(message.content),
            tool_calls,
            usage,
            reasoning_content: message.thinking,
        }
    }

    async fn fetch_tags(&self, timeout: Duration) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.classify(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: truncate_with_ellipsis(raw.trim(), MAX_ERROR_BODY_CHARS),
            });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(tags.models)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        let body = self.build_chat_request(&request);
        let response = self.send_request(&body).await?;
        Ok(Self::into_chat_response(response))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(self.fetch_tags(self.chat_timeout).await?)
    }

    async fn is_reachable(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Ollama probe failed: {e}");
                false
            }
        }
    }
}
