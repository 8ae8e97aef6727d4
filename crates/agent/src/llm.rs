//! AI query abstraction and OpenAI-compatible implementation.

use std::collections::HashMap;
use std::str::FromStr;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use proto::LlmError;
use tracing::debug;

use crate::markdown::render_markdown;
use crate::providers::ProviderPreset;

/// A single-prompt request to a language-model provider.
#[derive(Clone, PartialEq, Eq)]
pub struct AiRequest {
    /// User prompt with the `/ai` prefix already stripped.
    pub prompt: String,
    /// Provider id (credential-store key).
    pub provider: String,
    /// Model id.
    pub model: String,
    /// Provider API key.
    pub key: String,
}

impl std::fmt::Debug for AiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiRequest")
            .field("prompt", &self.prompt)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("key", &proto::mask_secret(&self.key))
            .finish()
    }
}

/// Single request / single response language-model call.
#[async_trait]
pub trait AiQuery: Send + Sync {
    /// Sends the prompt and resolves to sanitized HTML of the reply.
    async fn ask(&self, request: AiRequest) -> Result<String, LlmError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint (Groq, OpenAI,
/// OpenRouter, ...).
///
/// A client is built per request because the key travels with the request.
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleQuery {
    /// provider id -> base URL, consulted before the built-in presets.
    base_urls: HashMap<String, String>,
}

impl OpenAiCompatibleQuery {
    /// Creates a query client that only knows the built-in presets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overrides) the base URL for a provider id.
    pub fn with_base_url(mut self, provider: impl Into<String>, url: impl Into<String>) -> Self {
        self.base_urls.insert(provider.into(), url.into());
        self
    }

    /// Resolves the API base URL for `provider`.
    pub fn base_url_for(&self, provider: &str) -> Result<String, LlmError> {
        if let Some(url) = self.base_urls.get(provider)
            && !url.trim().is_empty()
        {
            return Ok(url.trim_end_matches('/').to_string());
        }
        ProviderPreset::from_str(provider).map(|preset| preset.base_url().to_string())
    }
}

#[async_trait]
impl AiQuery for OpenAiCompatibleQuery {
    async fn ask(&self, request: AiRequest) -> Result<String, LlmError> {
        let base_url = self.base_url_for(&request.provider)?;
        let config = OpenAIConfig::new()
            .with_api_key(request.key.clone())
            .with_api_base(base_url.clone());
        let client = Client::with_config(config);

        let body = build_request(&request)?;

        debug!(
            provider = %request.provider,
            model = %request.model,
            base_url = %base_url,
            "Sending AI query"
        );

        let response = client
            .chat()
            .create(body)
            .await
            .map_err(|e| map_api_error(&request.provider, e))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".into()))?;
        let content = choice.message.content.unwrap_or_default();

        debug!(chars = content.len(), "AI reply received");
        Ok(render_markdown(&content))
    }
}

/// Builds the chat-completions body: one user message, no history.
fn build_request(request: &AiRequest) -> Result<CreateChatCompletionRequest, LlmError> {
    let user = ChatCompletionRequestUserMessageArgs::default()
        .content(request.prompt.clone())
        .build()
        .map_err(|e| LlmError::Serialization(e.to_string()))?;

    CreateChatCompletionRequestArgs::default()
        .model(request.model.clone())
        .messages(vec![ChatCompletionRequestMessage::User(user)])
        .build()
        .map_err(|e| LlmError::Serialization(e.to_string()))
}

/// Maps client errors to a human-readable [`LlmError`].
fn map_api_error(provider: &str, err: OpenAIError) -> LlmError {
    let msg = err.to_string();
    debug!(error = %msg, "AI provider error");
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") || lower.contains("rate_limit") {
        return LlmError::RateLimit;
    }
    let hint = if lower.contains("invalid api key") || lower.contains("invalid_api_key") {
        format!(" Check the {provider} key with `nexus keys set`.")
    } else if lower.contains("does not exist") || lower.contains("model_not_found") {
        " Try `nexus select` to pick a different model.".to_string()
    } else {
        String::new()
    };
    LlmError::Api(format!("{msg}{hint}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> AiRequest {
        AiRequest {
            prompt: "what is 2+2".to_string(),
            provider: "groq".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            key: "gsk_secret_1234".to_string(),
        }
    }

    #[test]
    fn debug_output_masks_key() {
        let debug = format!("{:?}", sample_request());
        assert!(debug.contains("what is 2+2"));
        assert!(!debug.contains("gsk_secret"));
        assert!(debug.contains("1234"));
    }

    #[test]
    fn base_url_for_presets_and_overrides() {
        let query = OpenAiCompatibleQuery::new()
            .with_base_url("local", "http://localhost:11434/v1/")
            .with_base_url("groq", "https://proxy.example.com/groq");

        assert_eq!(
            query.base_url_for("local").expect("override"),
            "http://localhost:11434/v1"
        );
        assert_eq!(
            query.base_url_for("groq").expect("override wins"),
            "https://proxy.example.com/groq"
        );
        assert_eq!(
            query.base_url_for("openai").expect("preset"),
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn base_url_for_unknown_provider_fails() {
        let err = OpenAiCompatibleQuery::new()
            .base_url_for("acme")
            .expect_err("unknown provider");
        assert!(err.to_string().contains("Unknown provider: acme"));
    }

    #[test]
    fn empty_override_falls_back_to_preset() {
        let query = OpenAiCompatibleQuery::new().with_base_url("groq", "  ");
        assert_eq!(
            query.base_url_for("groq").expect("preset"),
            "https://api.groq.com/openai/v1"
        );
    }

    #[test]
    fn build_request_sends_single_user_message() {
        let body = build_request(&sample_request()).expect("request");
        assert_eq!(body.model, "llama-3.3-70b-versatile");
        assert_eq!(body.messages.len(), 1);
        assert!(matches!(
            body.messages[0],
            ChatCompletionRequestMessage::User(_)
        ));
    }

    #[test]
    fn map_api_error_detects_rate_limits() {
        let err = map_api_error(
            "groq",
            OpenAIError::InvalidArgument("Rate limit reached for model".to_string()),
        );
        assert!(matches!(err, LlmError::RateLimit));
    }

    #[test]
    fn map_api_error_adds_key_hint() {
        let err = map_api_error(
            "groq",
            OpenAIError::InvalidArgument("Invalid API Key".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("Invalid API Key"));
        assert!(msg.contains("nexus keys set"));
    }

    #[tokio::test]
    async fn ask_unknown_provider_fails_before_network() {
        let mut request = sample_request();
        request.provider = "acme".to_string();
        let err = OpenAiCompatibleQuery::new()
            .ask(request)
            .await
            .expect_err("unknown provider");
        assert!(matches!(err, LlmError::UnknownProvider(_)));
    }
}
