//! Text embeddings
//!
//! The skill cache and the knowledge store rank rows by cosine similarity
//! when an [`Embedder`] is wired in, and fall back to FTS5 otherwise.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Distinct texts kept in the in-process cache
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
}

impl EmbeddingConfig {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(30),
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings from a local Ollama server (`/api/embed`)
pub struct OllamaEmbedder {
    config: EmbeddingConfig,
    http: reqwest::Client,
    reachable: AtomicBool,
    memo: Cache<String, Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build embedding HTTP client")?;
        let memo = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();

        Ok(Self {
            config,
            http,
            reachable: AtomicBool::new(true),
            memo,
        })
    }

    /// Ask the server for its model list. The answer gates every later call.
    pub async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let ok = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);
        self.reachable.store(ok, AtomicOrdering::Relaxed);
        ok
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(AtomicOrdering::Relaxed)
    }

    pub fn cached_entries(&self) -> u64 {
        self.memo.entry_count()
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .http
            .post(format!("{}/api/embed", self.config.base_url))
            .json(&serde_json::json!({ "model": self.config.model, "input": text }))
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", self.config.base_url))?;

        let status = response.status();
        if !status.is_success() {
            self.reachable.store(false, AtomicOrdering::Relaxed);
            return Err(anyhow!("Ollama answered {} for model '{}'", status, self.config.model));
        }

        let body: EmbedResponse = response.json().await.context("Malformed embedding response")?;
        body.embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("Model '{}' returned no embedding", self.config.model))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.is_reachable() {
            return Err(anyhow!("Ollama embeddings are offline"));
        }

        let key = text.trim().to_string();
        let vector = self
            .memo
            .try_get_with(key, self.request(text))
            .await
            .map_err(|e| {
                warn!("Embedding failed: {}", e);
                anyhow!("{}", e)
            })?;
        debug!("Embedding ready ({} dims)", vector.len());
        Ok(vector)
    }
}

/// Cosine of the angle between `a` and `b`; 0.0 when undefined
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let denom = aa.sqrt() * bb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// The `k` rows closest to `query`, best first
pub fn rank_by_similarity<K: Clone>(query: &[f32], rows: &[(K, Vec<f32>)], k: usize) -> Vec<(K, f32)> {
    let mut ranked: Vec<(K, f32)> = rows
        .iter()
        .map(|(key, vector)| (key.clone(), cosine_similarity(query, vector)))
        .collect();
    ranked.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(Ordering::Equal));
    ranked.truncate(k);
    ranked
}

/// Little-endian f32 BLOB
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Inverse of [`encode_vector`]; a trailing partial value is ignored
pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|c| c.try_into().ok().map(f32::from_le_bytes))
        .collect()
}
