//! Anthropic backend (Messages API)

use super::{check_status, http_client, GenerationBackend};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: usize = 4096;

pub struct AnthropicBackend {
    client: Client,
    api_key: Option<String>,
    model: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

impl AnthropicBackend {
    pub fn new(model: &str, api_key: Option<&str>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client("anthropic", Duration::from_secs(120))?,
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
            name: format!("anthropic/{}", model),
        })
    }

    /// Check if API key is configured
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::not_configured(&self.name, "ANTHROPIC_API_KEY not set"))?;

        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: system_prompt.map(|s| s.to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!("Calling Claude API: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        let response = check_status(&self.name, response).await?;
        let result: MessageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        let content = result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n");

        info!(
            "Claude response: model={}, in={}, out={}",
            self.model, result.usage.input_tokens, result.usage.output_tokens
        );

        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                backend: self.name.clone(),
            });
        }
        Ok(content)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if !self.is_available() {
            return Err(ProviderError::not_configured(&self.name, "ANTHROPIC_API_KEY not set"));
        }
        self.generate("Hi", None).await.map(|_| ())
    }
}
