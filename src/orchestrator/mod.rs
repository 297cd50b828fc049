//! Orchestrator
//!
//! Runs one query end to end:
//!
//! ```text
//! ingest? → cache lookup ─ hit ──────────────────────────→ run cached → outcome
//!                         └ miss → retrieve → draft → integrity loop
//!                                   → run accepted → store → review? → outcome
//! ```
//!
//! Backend overrides are resolved per call into fresh component
//! instances. Shared state is never swapped, so concurrent queries on one
//! `Orchestrator` cannot see each other's overrides.

pub mod build;
pub mod outcome;

pub use build::BuildReport;
pub use outcome::{
    BackendOverrides, CacheStatus, QueryOutcome, QueryRequest, QueryStatus, Trace, EXECUTION_ERROR,
    ORCHESTRATOR_ERROR,
};

use crate::config::Config;
use crate::embeddings::{EmbeddingConfig, Embedder, OllamaEmbedder};
use crate::error::ProviderError;
use crate::grounding::GroundingReviewer;
use crate::integrity::{FailureAnalyzer, IntegrityController, StaticPolicy, TestGenerator, DEFAULT_MAX_ATTEMPTS};
use crate::knowledge::{ContextRetriever, DocumentIngest, FileIngest, KnowledgeStore};
use crate::llm::{BackendFactory, GenerationBackend, HttpBackendFactory};
use crate::sandbox::{LocalSandbox, SandboxConfig, ScriptRunner};
use crate::skills::{SkillCache, SkillMatch, SqliteSkillCache, VerificationLog};
use crate::synthesizer::Synthesizer;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Number of knowledge chunks merged into the synthesis prompt
pub const DEFAULT_CONTEXT_CHUNKS: usize = 3;

/// Collaborators an orchestrator is assembled from
pub struct Components {
    pub synthesizer: Arc<dyn GenerationBackend>,
    pub integrity: Arc<dyn GenerationBackend>,
    /// Resolves per-call override specs
    pub factory: Arc<dyn BackendFactory>,
    pub runner: Arc<dyn ScriptRunner>,
    pub cache: Arc<dyn SkillCache>,
    pub retriever: Arc<dyn ContextRetriever>,
    pub ingest: Arc<dyn DocumentIngest>,
}

/// Backends chosen for a single call
struct QueryBackends {
    synthesizer: Arc<dyn GenerationBackend>,
    integrity: Arc<dyn GenerationBackend>,
}

pub struct Orchestrator {
    synthesizer: Arc<dyn GenerationBackend>,
    integrity: Arc<dyn GenerationBackend>,
    factory: Arc<dyn BackendFactory>,
    runner: Arc<dyn ScriptRunner>,
    cache: Arc<dyn SkillCache>,
    retriever: Arc<dyn ContextRetriever>,
    ingest: Arc<dyn DocumentIngest>,
    grounding: Option<GroundingReviewer>,
    policy: Arc<StaticPolicy>,
    max_attempts: u32,
    context_chunks: usize,
}

impl Orchestrator {
    pub fn new(components: Components) -> Self {
        Self {
            synthesizer: components.synthesizer,
            integrity: components.integrity,
            factory: components.factory,
            runner: components.runner,
            cache: components.cache,
            retriever: components.retriever,
            ingest: components.ingest,
            grounding: None,
            policy: Arc::new(StaticPolicy::default()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            context_chunks: DEFAULT_CONTEXT_CHUNKS,
        }
    }

    /// Wire the HTTP backends, local sandbox and SQLite stores from `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        let factory = Arc::new(HttpBackendFactory::from_config(config));
        let synthesizer = factory
            .build(&config.synthesizer_model)
            .context("Invalid synthesizer model")?;
        let integrity = factory
            .build(&config.integrity_model)
            .context("Invalid integrity model")?;
        let grounding = config
            .grounding_model
            .as_deref()
            .map(|spec| factory.build(spec))
            .transpose()
            .context("Invalid grounding model")?;

        let embedder = OllamaEmbedder::new(EmbeddingConfig::new(&config.ollama_url, &config.embedding_model))?;
        let embedder: Option<Arc<dyn Embedder>> = if embedder.probe().await {
            info!("Embedding service available - semantic lookup enabled");
            Some(Arc::new(embedder))
        } else {
            warn!("Embedding service unavailable - using keyword lookup only");
            None
        };

        let cache = SqliteSkillCache::open(&config.skills_db_path(), embedder.clone())?
            .with_min_similarity(config.skill_min_similarity);
        let knowledge = KnowledgeStore::open(&config.knowledge_db_path(), embedder)?;
        let runner = LocalSandbox::new(SandboxConfig::python(&config.python, config.sandbox_timeout));

        let mut orchestrator = Self::new(Components {
            synthesizer,
            integrity,
            factory,
            runner: Arc::new(runner),
            cache: Arc::new(cache),
            retriever: Arc::new(knowledge),
            ingest: Arc::new(FileIngest::new()),
        })
        .with_max_attempts(config.max_attempts)
        .with_context_chunks(config.context_chunks);

        if let Some(backend) = grounding {
            orchestrator = orchestrator.with_grounding(backend);
        }
        Ok(orchestrator)
    }

    pub fn with_grounding(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.grounding = Some(GroundingReviewer::new(backend));
        self
    }

    pub fn with_policy(mut self, policy: StaticPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_context_chunks(mut self, k: usize) -> Self {
        self.context_chunks = k;
        self
    }

    /// Default synthesizer backend, untouched by any per-call override
    pub fn synthesizer_backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.synthesizer
    }

    /// Default integrity backend, untouched by any per-call override
    pub fn integrity_backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.integrity
    }

    pub fn cache(&self) -> &Arc<dyn SkillCache> {
        &self.cache
    }

    /// Probe every configured backend: (stage, backend name, result)
    pub async fn health_check(&self) -> Vec<(&'static str, String, Result<(), ProviderError>)> {
        let mut backends: Vec<(&'static str, &Arc<dyn GenerationBackend>)> =
            vec![("synthesizer", &self.synthesizer), ("integrity", &self.integrity)];
        if let Some(reviewer) = &self.grounding {
            backends.push(("grounding", reviewer.backend()));
        }

        let mut report = Vec::with_capacity(backends.len());
        for (stage, backend) in backends {
            let result = backend.health_check().await;
            report.push((stage, backend.name().to_string(), result));
        }
        report
    }

    /// Extract a document and add it to the knowledge store; returns chunk count
    pub async fn ingest_document(&self, path: &Path) -> Result<usize> {
        let text = self.ingest.ingest(path).await?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.retriever.add_document(&text, &source).await
    }

    /// Answer `request`. Never fails: every error becomes an outcome with
    /// empty code and an `Orchestrator Error:` message.
    pub async fn process_query(&self, request: &QueryRequest) -> QueryOutcome {
        info!("Processing query: {}", request.query);
        let mut trace = Trace::new();

        if let Some(paper) = &request.paper {
            match self.ingest_document(paper).await {
                Ok(chunks) => info!("Ingested {} ({} chunks)", paper.display(), chunks),
                Err(e) => {
                    warn!("Failed to ingest {}: {}", paper.display(), e);
                    trace.warn(format!("Failed to ingest {}: {}", paper.display(), e));
                }
            }
        }

        if request.overrides.is_empty() {
            match self.cache.retrieve(&request.query).await {
                Ok(Some(hit)) => {
                    info!("Skill cache hit ({:?}, score {:.3})", hit.method, hit.score);
                    trace.cache = CacheStatus::Hit;
                    return self.run_cached(hit, trace).await;
                }
                Ok(None) => {
                    info!("Skill cache miss - starting synthesis");
                    trace.cache = CacheStatus::Miss;
                }
                Err(e) => {
                    warn!("Skill cache lookup failed: {}", e);
                    trace.warn(format!("Skill cache lookup failed: {}", e));
                    trace.cache = CacheStatus::Miss;
                }
            }
        } else {
            info!("Backend override requested - skipping skill cache");
            trace.cache = CacheStatus::Bypassed;
        }

        match self.synthesize(request, &mut trace).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Query failed: {:#}", e);
                QueryOutcome::failed(e, trace)
            }
        }
    }

    async fn run_cached(&self, hit: SkillMatch, mut trace: Trace) -> QueryOutcome {
        let id = hit.record.id.get(..8).unwrap_or(&hit.record.id);
        trace.stage("skill_cache", format!("{} ({:?} match)", id, hit.method));
        trace.stage("execution", self.runner.name());

        let code = hit.record.code;
        let result = self.runner.run(&code).await;
        if !result.success {
            warn!("Cached skill {} failed to run", id);
            return QueryOutcome::execution_failed(code, &result.error_log, trace);
        }

        QueryOutcome {
            code,
            output: result.stdout,
            trace,
            status: QueryStatus::CacheHit,
            review: None,
        }
    }

    /// Resolve overrides into backends for this call only
    fn resolve_backends(&self, overrides: &BackendOverrides, trace: &mut Trace) -> Result<QueryBackends, ProviderError> {
        let synthesizer = match &overrides.synthesizer {
            Some(spec) => {
                let backend = self.factory.build(spec)?;
                trace.stage("synthesizer", format!("{} (override)", backend.name()));
                backend
            }
            None => {
                trace.stage("synthesizer", self.synthesizer.name());
                self.synthesizer.clone()
            }
        };

        let integrity = match &overrides.integrity {
            Some(spec) => {
                let backend = self.factory.build(spec)?;
                trace.stage("integrity", format!("{} (override)", backend.name()));
                backend
            }
            None => {
                trace.stage("integrity", self.integrity.name());
                self.integrity.clone()
            }
        };

        Ok(QueryBackends { synthesizer, integrity })
    }

    async fn synthesize(&self, request: &QueryRequest, trace: &mut Trace) -> Result<QueryOutcome> {
        let backends = self.resolve_backends(&request.overrides, trace)?;
        trace.stage("retriever", self.retriever.name());
        trace.stage("execution", self.runner.name());

        let chunks = match self.retriever.retrieve(&request.query, self.context_chunks).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Context retrieval failed: {}", e);
                trace.warn(format!("Context retrieval failed: {}", e));
                Vec::new()
            }
        };
        if !chunks.is_empty() {
            info!("Retrieved {} context chunks", chunks.len());
        }

        let context = synthesis_context(&chunks, request.data_context.as_deref());
        let task = if context.is_empty() {
            request.query.clone()
        } else {
            format!("{}\n\n{}", request.query, context)
        };

        let synthesizer = Synthesizer::new(backends.synthesizer);
        let controller = IntegrityController::new(
            synthesizer.clone(),
            TestGenerator::new(backends.integrity.clone()),
            FailureAnalyzer::new(backends.integrity),
            self.runner.clone(),
        )
        .with_policy(self.policy.clone())
        .with_max_attempts(self.max_attempts);

        let draft = synthesizer.draft(&request.query, &context).await?;
        let report = controller.run(draft, &task).await?;
        trace.repair_cycles = report.repair_cycles();

        info!("Running accepted skill for the answer");
        let code = report.accepted.body;
        let result = self.runner.run(&code).await;
        if !result.success {
            warn!("Accepted skill failed its real run");
            return Ok(QueryOutcome::execution_failed(code, &result.error_log, trace.clone()));
        }

        let log = VerificationLog::from_execution(&report.verification, "integrity-loop");
        match self.cache.store(&code, &request.query, &log).await {
            Ok(true) => info!("Cached verified skill"),
            Ok(false) => warn!("Skill cache declined a verified skill"),
            Err(e) => {
                warn!("Failed to cache skill: {}", e);
                trace.warn(format!("Failed to cache skill: {}", e));
            }
        }

        let review = match &self.grounding {
            Some(reviewer) => {
                trace.stage("grounding", reviewer.backend_name());
                match reviewer.review(&request.query, &code, &result.stdout).await {
                    Ok(verdict) => Some(verdict),
                    Err(e) => {
                        warn!("Grounding review failed: {}", e);
                        trace.warn(format!("Grounding review failed: {}", e));
                        None
                    }
                }
            }
            None => None,
        };

        Ok(QueryOutcome {
            code,
            output: result.stdout,
            trace: trace.clone(),
            status: QueryStatus::Answered,
            review,
        })
    }
}

/// Retrieved chunks and data reference, as handed to the synthesizer
fn synthesis_context(chunks: &[String], data_context: Option<&str>) -> String {
    let mut sections = Vec::new();
    if !chunks.is_empty() {
        sections.push(format!("Context:\n{}", chunks.join("\n\n")));
    }
    if let Some(data) = data_context.filter(|d| !d.trim().is_empty()) {
        sections.push(format!("Data: {}", data));
    }
    sections.join("\n")
}
