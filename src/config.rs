//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key (bare model names and `gemini/...` specs)
    pub gemini_api_key: Option<String>,

    /// OpenRouter API key (`openrouter/...` specs)
    pub openrouter_api_key: Option<String>,

    /// Anthropic API key (`anthropic/...` specs)
    pub anthropic_api_key: Option<String>,

    /// Hugging Face token (`huggingface/...` specs); public models work without one
    pub hf_token: Option<String>,

    /// Ollama base URL for local chat and embeddings
    pub ollama_url: String,

    /// Embedding model served by Ollama
    pub embedding_model: String,

    /// Backend spec for drafting and repairing code
    pub synthesizer_model: String,

    /// Backend spec for test generation and failure analysis
    pub integrity_model: String,

    /// Backend spec for the optional grounding review
    pub grounding_model: Option<String>,

    /// Specs tried, in order, after the requested backend fails
    pub fallback_models: Vec<String>,

    /// Retries per backend before moving down the fallback chain
    pub provider_retries: usize,

    /// Directory holding skills.db and knowledge.db
    pub data_dir: PathBuf,

    /// Interpreter used by the sandbox
    pub python: String,

    /// Sandbox wall-clock timeout
    pub sandbox_timeout: Duration,

    /// Integrity loop attempt budget
    pub max_attempts: u32,

    /// Number of knowledge chunks merged into the synthesis prompt
    pub context_chunks: usize,

    /// Optional similarity floor for skill cache hits
    pub skill_min_similarity: Option<f32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let gemini_api_key = non_empty_var("GEMINI_API_KEY");
        let openrouter_api_key = non_empty_var("OPENROUTER_API_KEY");
        let anthropic_api_key = non_empty_var("ANTHROPIC_API_KEY");
        let hf_token = non_empty_var("HF_TOKEN").or_else(|| non_empty_var("HF_API_KEY"));

        let ollama_url = std::env::var("OLLAMA_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        let embedding_model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "nomic-embed-text".to_string());

        let synthesizer_model = std::env::var("SKILLFORGE_SYNTHESIZER_MODEL")
            .unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let integrity_model = std::env::var("SKILLFORGE_INTEGRITY_MODEL")
            .unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let grounding_model = non_empty_var("SKILLFORGE_GROUNDING_MODEL");

        let fallback_models = std::env::var("SKILLFORGE_FALLBACK_MODELS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| vec!["openrouter/google/gemini-2.0-flash-001".to_string()]);

        let provider_retries = parse_var("SKILLFORGE_PROVIDER_RETRIES")?.unwrap_or(2);

        let data_dir = std::env::var("SKILLFORGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("skillforge")
            });

        let python = std::env::var("SKILLFORGE_PYTHON").unwrap_or_else(|_| "python3".to_string());

        let sandbox_timeout =
            Duration::from_secs(parse_var("SKILLFORGE_SANDBOX_TIMEOUT")?.unwrap_or(10));

        let max_attempts = parse_var("SKILLFORGE_MAX_ATTEMPTS")?.unwrap_or(3);
        if max_attempts == 0 {
            anyhow::bail!("SKILLFORGE_MAX_ATTEMPTS must be at least 1");
        }

        let context_chunks = parse_var("SKILLFORGE_CONTEXT_CHUNKS")?.unwrap_or(3);
        let skill_min_similarity = parse_var("SKILLFORGE_SKILL_MIN_SIMILARITY")?;

        Ok(Self {
            gemini_api_key,
            openrouter_api_key,
            anthropic_api_key,
            hf_token,
            ollama_url,
            embedding_model,
            synthesizer_model,
            integrity_model,
            grounding_model,
            fallback_models,
            provider_retries,
            data_dir,
            python,
            sandbox_timeout,
            max_attempts,
            context_chunks,
            skill_min_similarity,
        })
    }

    /// Skill cache database path
    pub fn skills_db_path(&self) -> PathBuf {
        self.data_dir.join("skills.db")
    }

    /// Knowledge store database path
    pub fn knowledge_db_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(None),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
