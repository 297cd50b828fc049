//! Gemini backend (Generative Language REST API)

use super::{check_status, http_client, GenerationBackend};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    client: Client,
    api_key: Option<String>,
    model: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiBackend {
    pub fn new(model: &str, api_key: Option<&str>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client("gemini", Duration::from_secs(120))?,
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
            name: format!("gemini/{}", model),
        })
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::not_configured(&self.name, "GEMINI_API_KEY not set"))?;

        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            system_instruction: system_prompt.map(|s| Content {
                role: None,
                parts: vec![Part {
                    text: Some(s.to_string()),
                }],
            }),
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        let url = format!("{}/models/{}:generateContent", GEMINI_API_BASE, self.model);
        debug!("Calling Gemini: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        let response = check_status(&self.name, response).await?;
        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::request(&self.name, e))?;

        let text = result
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                backend: self.name.clone(),
            });
        }
        Ok(text)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.api_key.is_none() {
            return Err(ProviderError::not_configured(&self.name, "GEMINI_API_KEY not set"));
        }
        self.generate("Hi", None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some("hello".to_string()),
                }],
            }],
            system_instruction: None,
            generation_config: GenerationConfig { temperature: 0.2 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert!(json.get("systemInstruction").is_none());
        assert!(json.get("generationConfig").is_some());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let backend = GeminiBackend::new("gemini-2.0-flash", None).unwrap();
        assert_eq!(backend.name(), "gemini/gemini-2.0-flash");
        let err = backend.generate("hi", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured { .. }));
    }
}
