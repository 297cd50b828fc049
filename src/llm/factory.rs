//! Backend construction
//!
//! Resolves a spec string into a ready-to-use backend. Provider selection
//! happens here and nowhere else.

use super::{
    AnthropicBackend, BackendSpec, FallbackChain, GeminiBackend, GenerationBackend, HuggingFaceBackend, OllamaBackend,
    OpenRouterBackend, Provider, RetryPolicy,
};
use crate::config::Config;
use crate::error::ProviderError;
use std::sync::Arc;
use tracing::debug;

/// Builds generation backends from spec strings
pub trait BackendFactory: Send + Sync {
    fn build(&self, spec: &str) -> Result<Arc<dyn GenerationBackend>, ProviderError>;
}

/// Factory for the HTTP providers, wrapping each request in a fallback chain
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    gemini_api_key: Option<String>,
    openrouter_api_key: Option<String>,
    anthropic_api_key: Option<String>,
    hf_token: Option<String>,
    ollama_url: String,
    fallback_specs: Vec<String>,
    retry: RetryPolicy,
}

impl HttpBackendFactory {
    pub fn from_config(config: &Config) -> Self {
        Self {
            gemini_api_key: config.gemini_api_key.clone(),
            openrouter_api_key: config.openrouter_api_key.clone(),
            anthropic_api_key: config.anthropic_api_key.clone(),
            hf_token: config.hf_token.clone(),
            ollama_url: config.ollama_url.clone(),
            fallback_specs: config.fallback_models.clone(),
            retry: RetryPolicy {
                max_retries: config.provider_retries,
                ..Default::default()
            },
        }
    }

    /// Build one backend with no retry or fallback around it
    pub fn build_single(&self, spec: &str) -> Result<Arc<dyn GenerationBackend>, ProviderError> {
        let spec = BackendSpec::parse(spec)?;
        let backend: Arc<dyn GenerationBackend> = match spec.provider {
            Provider::Gemini => Arc::new(GeminiBackend::new(&spec.model, self.gemini_api_key.as_deref())?),
            Provider::OpenRouter => Arc::new(OpenRouterBackend::new(
                &spec.model,
                self.openrouter_api_key.as_deref(),
            )?),
            Provider::Ollama => Arc::new(OllamaBackend::new(&spec.model, &self.ollama_url)?),
            Provider::Anthropic => Arc::new(AnthropicBackend::new(
                &spec.model,
                self.anthropic_api_key.as_deref(),
            )?),
            Provider::HuggingFace => Arc::new(HuggingFaceBackend::new(&spec.model, self.hf_token.as_deref())?),
        };
        Ok(backend)
    }

    /// Primary first, then configured fallbacks, without duplicates
    fn chain_specs(&self, primary: &str) -> Vec<String> {
        let mut specs = vec![primary.trim().to_string()];
        for spec in &self.fallback_specs {
            if !specs.iter().any(|s| s == spec) {
                specs.push(spec.clone());
            }
        }
        specs
    }
}

impl BackendFactory for HttpBackendFactory {
    fn build(&self, spec: &str) -> Result<Arc<dyn GenerationBackend>, ProviderError> {
        let specs = self.chain_specs(spec);
        let mut backends = Vec::with_capacity(specs.len());

        // The primary spec must be valid; a bad fallback entry is only skipped
        backends.push(self.build_single(&specs[0])?);
        for fallback in &specs[1..] {
            match self.build_single(fallback) {
                Ok(backend) => backends.push(backend),
                Err(e) => debug!("Skipping fallback '{}': {}", fallback, e),
            }
        }

        Ok(Arc::new(FallbackChain::new(backends, self.retry.clone())))
    }
}
