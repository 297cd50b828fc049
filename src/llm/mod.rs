//! Generation Backends
//!
//! Every text-generation provider sits behind one capability:
//!
//! ```text
//! generate(prompt, system_prompt) -> text | ProviderError
//! ```
//!
//! A model spec string (`ollama/deepseek-r1:8b`, `openrouter/meta-llama/...`,
//! `anthropic/claude-...`, `huggingface/google/medgemma-4b-it`, `gemini-2.0-flash`) is parsed once into a
//! [`BackendSpec`] when a backend is constructed. Call sites never inspect
//! provider tags; they hold an `Arc<dyn GenerationBackend>`.
//!
//! Retrying and falling back across providers is a separate policy object,
//! [`FallbackChain`], so it can be tested apart from the integrity loop.

pub mod anthropic;
pub mod factory;
pub mod fallback;
pub mod gemini;
pub mod huggingface;
#[cfg(test)]
pub(crate) mod mock;
pub mod ollama;
pub mod openrouter;
pub mod text;

pub use anthropic::AnthropicBackend;
pub use factory::{BackendFactory, HttpBackendFactory};
pub use fallback::{ErrorClass, FallbackChain, RetryPolicy};
pub use gemini::GeminiBackend;
pub use huggingface::HuggingFaceBackend;
pub use ollama::OllamaBackend;
pub use openrouter::OpenRouterBackend;

use crate::error::ProviderError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Text generation capability shared by all providers
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Identifier recorded in traces (`provider/model`)
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError>;

    /// Cheap connectivity check
    async fn health_check(&self) -> Result<(), ProviderError> {
        self.generate("Hi", None).await.map(|_| ())
    }
}

/// Known providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
    OpenRouter,
    Ollama,
    Anthropic,
    HuggingFace,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
            Self::Anthropic => "anthropic",
            Self::HuggingFace => "huggingface",
        }
    }
}

/// Parsed model spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub provider: Provider,
    pub model: String,
}

impl BackendSpec {
    /// Parse a spec string.
    ///
    /// Bare names (no `/`) are Gemini models. Anything else must carry a
    /// known provider prefix.
    pub fn parse(spec: &str) -> Result<Self, ProviderError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ProviderError::UnknownBackend(spec.to_string()));
        }

        let prefixes = [
            ("gemini/", Provider::Gemini),
            ("openrouter/", Provider::OpenRouter),
            ("ollama/", Provider::Ollama),
            ("anthropic/", Provider::Anthropic),
            ("huggingface/", Provider::HuggingFace),
        ];

        for (prefix, provider) in prefixes {
            if let Some(model) = spec.strip_prefix(prefix) {
                if model.is_empty() {
                    return Err(ProviderError::UnknownBackend(spec.to_string()));
                }
                return Ok(Self {
                    provider,
                    model: model.to_string(),
                });
            }
        }

        if spec.contains('/') {
            return Err(ProviderError::UnknownBackend(spec.to_string()));
        }

        Ok(Self {
            provider: Provider::Gemini,
            model: spec.to_string(),
        })
    }
}

impl fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider.as_str(), self.model)
    }
}

/// Build an HTTP client with a request timeout
pub(crate) fn http_client(backend: &str, timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::request(backend, e))
}

/// Turn a non-success response into a `ProviderError::Status`
pub(crate) async fn check_status(
    backend: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        backend: backend.to_string(),
        status,
        body,
    })
}

/// Chat message in the OpenAI/Ollama shape
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

pub(crate) fn chat_messages(prompt: &str, system_prompt: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system_prompt {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: prompt.to_string(),
    });
    messages
}
