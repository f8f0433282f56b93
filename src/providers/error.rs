/// Classified failures talking to the Ollama server.
///
/// Every variant renders with a remediation hint so the CLI can print it
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error(
        "Failed to connect to Ollama at {url} after {attempts} attempts.\n\
         Please ensure Ollama is running:\n  \
         - Run 'ollama serve' in a terminal\n  \
         - Or check if Ollama is running on a different port\n  \
         - Use --ollama-url flag to specify custom URL"
    )]
    ConnectionFailure { url: String, attempts: u32 },

    #[error(
        "Request to Ollama timed out after {secs} seconds.\n\
         The model '{model}' might be too large or slow.\n\
         Try using a smaller model with the --model flag."
    )]
    Timeout { secs: u64, model: String },

    #[error(
        "Model '{model}' not found on Ollama server.\n\
         Available models can be listed with: ollama list\n\
         Pull the model with: ollama pull {model}"
    )]
    ModelNotFound { model: String },

    #[error("Ollama API error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse Ollama response: {0}")]
    InvalidResponse(String),

    #[error("Error communicating with Ollama: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Only connection-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::ConnectionFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_remediation() {
        let conn = ProviderError::ConnectionFailure {
            url: "http://localhost:11434".into(),
            attempts: 3,
        }
        .to_string();
        assert!(conn.contains("ollama serve"));
        assert!(conn.contains("--ollama-url"));
        assert!(conn.contains("after 3 attempts"));

        let timeout = ProviderError::Timeout {
            secs: 120,
            model: "big".into(),
        }
        .to_string();
        assert!(timeout.contains("120 seconds"));
        assert!(timeout.contains("--model"));

        let missing = ProviderError::ModelNotFound {
            model: "qwen2.5-coder:7b".into(),
        }
        .to_string();
        assert!(missing.contains("ollama pull qwen2.5-coder:7b"));
    }

    #[test]
    fn only_connection_failures_retry() {
        assert!(ProviderError::ConnectionFailure {
            url: String::new(),
            attempts: 1
        }
        .is_retryable());
        assert!(!ProviderError::Timeout {
            secs: 1,
            model: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::ModelNotFound {
            model: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Http {
            status: 500,
            body: String::new()
        }
        .is_retryable());
    }
}
