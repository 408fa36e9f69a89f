mod ollama;
mod openai;

use async_trait::async_trait;
use std::time::Duration;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// System prompt shared by all providers
pub const CHAT_SYSTEM_PROMPT: &str =
    "You are a friendly chatbot in a group chat room. Reply naturally and briefly to the user's message.";

/// Request to generate a chat reply
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// The prompt text
    pub prompt: String,
    /// Maximum response length in tokens (provider-dependent)
    pub max_tokens: Option<u32>,
    /// Timeout for the request
    pub timeout: Duration,
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,
    pub metadata: ResponseMetadata,
}

/// Metadata about the LLM response
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// Name of the provider (e.g., "openai", "ollama")
    pub provider: String,
    /// Model name used
    pub model: String,
    /// Tokens consumed (if available)
    pub tokens_used: Option<u32>,
    /// Latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all LLM providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a reply for the given prompt
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Get the name of this provider
    fn name(&self) -> &str;
}

/// Manager for the configured providers, tried in order
pub struct LlmManager {
    pub providers: Vec<Box<dyn LlmProvider>>,
}

impl LlmManager {
    pub fn new(providers: Vec<Box<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    /// Generate from the first provider that succeeds.
    /// Returns the last error if every provider fails.
    pub async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let mut last_error =
            LlmError::ConfigError("No LLM providers configured".to_string());

        for provider in &self.providers {
            match provider.generate(request.clone()).await {
                Ok(response) if !response.text.trim().is_empty() => {
                    tracing::debug!(
                        "Provider {} answered in {}ms (model {}, tokens {:?})",
                        response.metadata.provider,
                        response.metadata.latency_ms,
                        response.metadata.model,
                        response.metadata.tokens_used
                    );
                    return Ok(response);
                }
                Ok(_) => {
                    tracing::warn!("Provider {} returned an empty reply", provider.name());
                    last_error = LlmError::ParseError(format!(
                        "Provider '{}' returned an empty reply",
                        provider.name()
                    ));
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Configuration for LLM providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI model to use
    pub openai_model: String,
    /// Ollama base URL; Ollama is only used when this is set
    pub ollama_base_url: Option<String>,
    /// Ollama model to use
    pub ollama_model: String,
    /// Upper bound for a single generation call
    pub default_timeout: Duration,
    /// Default max tokens for responses
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: None,
            ollama_model: "llama3.2".to_string(),
            default_timeout: Duration::from_secs(15),
            default_max_tokens: 150,
        }
    }
}

/// Read an environment variable, treating blank values as unset
fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            openai_api_key: env_non_empty("OPENAI_API_KEY"),
            openai_model: env_non_empty("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            ollama_base_url: env_non_empty("OLLAMA_BASE_URL"),
            ollama_model: env_non_empty("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            default_timeout: env_non_empty("LLM_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            default_max_tokens: env_non_empty("LLM_MAX_TOKENS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_tokens),
        }
    }

    /// Build an LlmManager with all configured providers
    pub fn build_manager(&self) -> LlmResult<LlmManager> {
        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )?));
        }

        if providers.is_empty() {
            return Err(LlmError::ConfigError(
                "No LLM providers configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
            ));
        }

        Ok(LlmManager::new(providers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct StaticProvider(&'static str);

    #[async_trait]
    impl LlmProvider for StaticProvider {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            Ok(GenerateResponse {
                text: self.0.to_string(),
                metadata: ResponseMetadata {
                    provider: "static".to_string(),
                    model: "static".to_string(),
                    tokens_used: None,
                    latency_ms: 0,
                },
            })
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl LlmProvider for BrokenProvider {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            Err(LlmError::ApiError("boom".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            prompt: "hey".to_string(),
            max_tokens: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.ollama_model, "llama3.2");
        assert!(config.ollama_base_url.is_none());
        assert_eq!(config.default_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_build_manager_without_providers_fails() {
        let result = LlmConfig::default().build_manager();
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_build_manager_with_openai_key() {
        let config = LlmConfig {
            openai_api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        let manager = config.build_manager().unwrap();
        assert_eq!(manager.providers.len(), 1);
        assert_eq!(manager.providers[0].name(), "openai");
    }

    #[tokio::test]
    async fn test_manager_falls_through_to_next_provider() {
        let manager = LlmManager::new(vec![
            Box::new(BrokenProvider),
            Box::new(StaticProvider("")),
            Box::new(StaticProvider("second try")),
        ]);

        let response = manager.generate(request()).await.unwrap();
        assert_eq!(response.text, "second try");
    }

    #[tokio::test]
    async fn test_manager_reports_last_error() {
        let manager = LlmManager::new(vec![Box::new(BrokenProvider)]);
        let result = manager.generate(request()).await;
        assert!(matches!(result, Err(LlmError::ApiError(_))));

        let empty = LlmManager::new(vec![]);
        assert!(matches!(
            empty.generate(request()).await,
            Err(LlmError::ConfigError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_treats_blank_as_unset() {
        std::env::set_var("OPENAI_API_KEY", "   ");
        std::env::set_var("OPENAI_MODEL", "gpt-4.1");
        std::env::set_var("LLM_TIMEOUT", "3");
        std::env::remove_var("OLLAMA_BASE_URL");

        let config = LlmConfig::from_env();
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.openai_model, "gpt-4.1");
        assert_eq!(config.default_timeout, Duration::from_secs(3));
        assert!(config.ollama_base_url.is_none());

        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("OPENAI_MODEL");
        std::env::remove_var("LLM_TIMEOUT");
    }
}
