//! Skillforge
//!
//! Turns a natural-language question, plus optional reference papers and
//! data, into a verified, reusable program ("skill") and its output.
//!
//! # Features
//!
//! - **Integrity loop**: static safety check, generated tests, sandboxed
//!   runs and critique-driven repair under a fixed attempt budget
//! - **Skill cache**: verified skills only, found again by semantic similarity
//! - **Interchangeable backends**: Gemini, OpenRouter, Ollama, Anthropic and Hugging Face
//!   behind one trait, with an explicit fallback chain
//! - **Per-call overrides**: resolved into fresh components, never swapped
//!   into shared state
//! - **Knowledge store**: chunked documents retrieved into the prompt
//!
//! # Architecture
//!
//! ```text
//! query ──► Orchestrator ──► SkillCache (SQLite + FTS5 + embeddings)
//!               │
//!               ├── KnowledgeStore ◄── FileIngest (text / pdftotext)
//!               ├── Synthesizer ─────────┐
//!               ├── IntegrityController ─┼──► GenerationBackend
//!               │     ├── StaticPolicy   │     (FallbackChain of providers)
//!               │     ├── TestGenerator ─┤
//!               │     └── FailureAnalyzer┘
//!               ├── LocalSandbox (subprocess + timeout)
//!               └── GroundingReviewer (optional)
//! ```

pub mod config;
pub mod embeddings;
pub mod error;
pub mod grounding;
pub mod integrity;
pub mod knowledge;
pub mod llm;
pub mod orchestrator;
pub mod sandbox;
pub mod skills;
pub mod synthesizer;

pub use config::Config;
pub use embeddings::{cosine_similarity, Embedder, EmbeddingConfig, OllamaEmbedder};
pub use error::{IngestError, IntegrityError, ProviderError};
pub use grounding::{GroundingReviewer, GroundingVerdict};
pub use integrity::{
    AttemptOutcome, AttemptRecord, Candidate, Critique, CritiqueOrigin, FailureAnalyzer, IntegrityController,
    IntegrityReport, Provenance, StaticPolicy, StaticVerdict, TestGenerator, TEST_SENTINEL,
};
pub use knowledge::{CodeScanner, ContextRetriever, DocumentIngest, FileIngest, KnowledgeStore};
pub use llm::{BackendFactory, BackendSpec, FallbackChain, GenerationBackend, HttpBackendFactory, Provider, RetryPolicy};
pub use orchestrator::{
    BackendOverrides, BuildReport, CacheStatus, Components, Orchestrator, QueryOutcome, QueryRequest, QueryStatus,
    Trace,
};
pub use sandbox::{ExecutionResult, LocalSandbox, SandboxConfig, SandboxFailure, ScriptRunner};
pub use skills::{MatchMethod, SkillCache, SkillMatch, SkillRecord, SqliteSkillCache, VerificationLog};
pub use synthesizer::{ExtractedTool, Synthesizer};
