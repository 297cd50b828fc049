//! Skill Cache
//!
//! Verified skills, addressed by semantic similarity to the query that
//! produced them rather than by exact key.
//!
//! # Invariant
//!
//! The cache never holds an artifact that did not pass verification:
//! `store` persists if and only if `verification_log.success` is true,
//! and there is no update or delete path.
//!
//! ```text
//! retrieve(query) ─┬─ embedder ok ──→ cosine top-1 (optional floor)
//!                  └─ no embedder ──→ FTS5 bm25 top-1
//! ```

pub mod store;

pub use store::SqliteSkillCache;

use crate::sandbox::ExecutionResult;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Evidence that a skill passed verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationLog {
    pub success: bool,
    /// What produced the verdict (`integrity-loop`, `bulk-build`)
    pub source: String,
    pub stdout: String,
    pub error_log: String,
}

impl VerificationLog {
    pub fn from_execution(result: &ExecutionResult, source: &str) -> Self {
        Self {
            success: result.success,
            source: source.to_string(),
            stdout: result.stdout.clone(),
            error_log: result.error_log.clone(),
        }
    }
}

/// A stored skill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: String,
    pub description: String,
    pub code: String,
    /// Short content hash of `code`
    pub code_hash: String,
    pub source: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Semantic,
    Keyword,
}

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub struct SkillMatch {
    pub record: SkillRecord,
    pub score: f32,
    pub method: MatchMethod,
}

/// Semantic store of verified skills
#[async_trait]
pub trait SkillCache: Send + Sync {
    /// Best match for `query`, if any
    async fn retrieve(&self, query: &str) -> Result<Option<SkillMatch>>;

    /// Persist `code` only when `log.success`; returns whether it was stored
    async fn store(&self, code: &str, description: &str, log: &VerificationLog) -> Result<bool>;

    /// Number of stored skills
    fn count(&self) -> Result<usize>;

    /// Most recent skills first
    fn list(&self, limit: usize) -> Result<Vec<SkillRecord>>;
}
