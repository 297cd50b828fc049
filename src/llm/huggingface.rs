//! Hugging Face backend (serverless text-generation inference)
//!
//! Tries the inference router first, then the legacy inference API. Gemma
//! instruction models get their chat template applied to the prompt.

use super::{check_status, http_client, GenerationBackend};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const HF_ROUTER_BASE: &str = "https://router.huggingface.co/hf-inference/models";
const HF_INFERENCE_BASE: &str = "https://api-inference.huggingface.co/models";
const HF_MODEL_INFO_BASE: &str = "https://huggingface.co/api/models";

const MAX_NEW_TOKENS: u32 = 512;

pub struct HuggingFaceBackend {
    client: Client,
    token: Option<String>,
    repo_id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    inputs: String,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct Generation {
    #[serde(default)]
    generated_text: Option<String>,
}

/// The API answers with a list for most models and a bare object for some
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Batch(Vec<Generation>),
    Single(Generation),
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        match self {
            Self::Batch(items) => items.into_iter().next().and_then(|g| g.generated_text),
            Self::Single(g) => g.generated_text,
        }
    }
}

impl HuggingFaceBackend {
    pub fn new(repo_id: &str, token: Option<&str>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client("huggingface", Duration::from_secs(60))?,
            token: token.map(|s| s.to_string()),
            repo_id: repo_id.to_string(),
            name: format!("huggingface/{}", repo_id),
        })
    }

    fn endpoints(&self) -> [String; 2] {
        [
            format!("{}/{}", HF_ROUTER_BASE, self.repo_id),
            format!("{}/{}", HF_INFERENCE_BASE, self.repo_id),
        ]
    }

    async fn post(&self, url: &str, request: &GenerateRequest) -> Result<String, ProviderError> {
        let mut builder = self.client.post(url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;
        let response = check_status(&self.name, response).await?;
        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        result
            .into_text()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse {
                backend: self.name.clone(),
            })
    }
}

#[async_trait]
impl GenerationBackend for HuggingFaceBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            inputs: format_prompt(&self.repo_id, prompt, system_prompt),
            parameters: GenerateParameters {
                max_new_tokens: MAX_NEW_TOKENS,
                temperature: 0.2,
                return_full_text: false,
            },
        };

        debug!("Calling Hugging Face: model={}, prompt_len={}", self.repo_id, prompt.len());

        let mut last_error = None;
        for url in self.endpoints() {
            match self.post(&url, &request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("Hugging Face endpoint {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ProviderError::EmptyResponse {
            backend: self.name.clone(),
        }))
    }

    /// Model metadata lookup; proves the repo exists and the token can see it
    async fn health_check(&self) -> Result<(), ProviderError> {
        let mut builder = self
            .client
            .get(format!("{}/{}", HF_MODEL_INFO_BASE, self.repo_id))
            .timeout(Duration::from_secs(10));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;
        check_status(&self.name, response).await.map(|_| ())
    }
}

/// Gemma models expect turn markers; others get the system text prepended
fn format_prompt(repo_id: &str, prompt: &str, system_prompt: Option<&str>) -> String {
    if repo_id.to_lowercase().contains("gemma") {
        let system = system_prompt
            .map(|s| format!("System: {}\n", s))
            .unwrap_or_default();
        return format!("<start_of_turn>user\n{system}{prompt}<end_of_turn>\n<start_of_turn>model\n");
    }
    match system_prompt {
        Some(system) => format!("{}\n\n{}", system, prompt),
        None => prompt.to_string(),
    }
}
