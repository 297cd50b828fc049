//! Ollama backend - local models over /api/chat

use super::{chat_messages, check_status, http_client, ChatMessage, GenerationBackend};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaBackend {
    pub fn new(model: &str, base_url: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client("ollama", Duration::from_secs(120))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            name: format!("ollama/{}", model),
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: chat_messages(prompt, system_prompt),
            stream: false,
            // Low temperature for coding/reasoning
            options: ChatOptions { temperature: 0.2 },
        };

        debug!("Calling Ollama: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        let response = check_status(&self.name, response).await?;
        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        result
            .message
            .map(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse {
                backend: self.name.clone(),
            })
    }

    /// The model must be pulled, not just the server reachable
    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        let response = check_status(&self.name, response).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        if tags.models.iter().any(|m| model_matches(&m.name, &self.model)) {
            Ok(())
        } else {
            Err(ProviderError::not_configured(
                &self.name,
                &format!("model '{}' is not pulled", self.model),
            ))
        }
    }
}

/// `qwen2.5-coder` matches `qwen2.5-coder:latest`; explicit tags must match exactly
fn model_matches(installed: &str, wanted: &str) -> bool {
    if wanted.contains(':') {
        installed == wanted
    } else {
        installed.split(':').next() == Some(wanted)
    }
}
