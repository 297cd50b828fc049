//! OpenRouter backend (OpenAI-compatible chat completions)

use super::{chat_messages, check_status, http_client, ChatMessage, GenerationBackend};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub struct OpenRouterBackend {
    client: Client,
    api_key: Option<String>,
    model: String,
    name: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenRouterBackend {
    pub fn new(model: &str, api_key: Option<&str>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client("openrouter", Duration::from_secs(60))?,
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
            name: format!("openrouter/{}", model),
            url: OPENROUTER_API_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl GenerationBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::not_configured(&self.name, "OPENROUTER_API_KEY not set"))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: chat_messages(prompt, system_prompt),
        };

        debug!("Calling OpenRouter: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .header("HTTP-Referer", "https://skillforge.local")
            .header("X-Title", "Skillforge")
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
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse {
                backend: self.name.clone(),
            })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        match self.api_key {
            Some(_) => Ok(()),
            None => Err(ProviderError::not_configured(&self.name, "OPENROUTER_API_KEY not set")),
        }
    }
}
