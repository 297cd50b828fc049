//! Shared test doubles for the integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use skillforge::{
    BackendFactory, Components, ContextRetriever, DocumentIngest, ExecutionResult, GenerationBackend,
    IngestError, ProviderError, ScriptRunner, SkillCache, SkillMatch, SkillRecord, SqliteSkillCache,
    VerificationLog,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

pub const DRAFT: &str = "Scientific Reasoning Agent";
pub const FIX: &str = "code debugger";
pub const TESTGEN: &str = "QA engineer";
pub const ANALYZE: &str = "expert debugger";
pub const EXTRACT: &str = "code extractor";
pub const REVIEW: &str = "scientific reviewer";

/// Backend whose replies are routed by a substring of the system prompt.
/// The last reply of a route repeats.
pub struct ScriptedBackend {
    name: String,
    routes: Mutex<Vec<(String, VecDeque<String>)>>,
    calls: Mutex<Vec<(Option<String>, String)>>,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            routes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, system_contains: &str, replies: &[&str]) -> Self {
        self.routes.lock().push((
            system_contains.to_string(),
            replies.iter().map(|r| r.to_string()).collect(),
        ));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Prompts sent under a matching system prompt
    pub fn prompts(&self, system_contains: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(system, _)| system.as_deref().is_some_and(|s| s.contains(system_contains)))
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    pub fn calls_matching(&self, system_contains: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(system, _)| system.as_deref().is_some_and(|s| s.contains(system_contains)))
            .count()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .push((system_prompt.map(str::to_string), prompt.to_string()));

        let system = system_prompt.unwrap_or_default();
        let mut routes = self.routes.lock();
        let queue = routes
            .iter_mut()
            .find(|(key, _)| system.contains(key.as_str()))
            .map(|(_, queue)| queue)
            .ok_or_else(|| ProviderError::EmptyResponse {
                backend: self.name.clone(),
            })?;

        let reply = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
        reply.ok_or_else(|| ProviderError::EmptyResponse {
            backend: self.name.clone(),
        })
    }
}

/// Backend that always fails with an HTTP error
pub struct DownBackend;

#[async_trait]
impl GenerationBackend for DownBackend {
    fn name(&self) -> &str {
        "down/model"
    }

    async fn generate(&self, _prompt: &str, _system_prompt: Option<&str>) -> Result<String, ProviderError> {
        Err(ProviderError::Status {
            backend: "down/model".to_string(),
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

/// Fails any script containing `BROKEN`, and `NEEDS_HARNESS` scripts run
/// without a test harness. Everything else prints `42`.
pub struct MarkerRunner {
    scripts: Mutex<Vec<String>>,
}

impl MarkerRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(Vec::new()),
        })
    }

    pub fn runs(&self) -> usize {
        self.scripts.lock().len()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }
}

#[async_trait]
impl ScriptRunner for MarkerRunner {
    fn name(&self) -> &str {
        "marker sandbox"
    }

    async fn run(&self, script: &str) -> ExecutionResult {
        self.scripts.lock().push(script.to_string());
        let error_log = if script.contains("BROKEN") {
            "Traceback (most recent call last):\nNameError: name 'BROKEN' is not defined"
        } else if script.contains("NEEDS_HARNESS") && !script.contains("TEST PASSED") {
            "RuntimeError: fixture missing"
        } else {
            ""
        };
        let success = error_log.is_empty();
        ExecutionResult {
            success,
            stdout: if success { "42\n".to_string() } else { String::new() },
            error_log: error_log.to_string(),
            failure: None,
            truncated: false,
            duration_ms: 1,
        }
    }
}

/// Resolves override specs from a fixed table
pub struct MapFactory {
    backends: HashMap<String, Arc<dyn GenerationBackend>>,
    built: Mutex<Vec<String>>,
}

impl MapFactory {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            built: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, spec: &str, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backends.insert(spec.to_string(), backend);
        self
    }

    pub fn built(&self) -> Vec<String> {
        self.built.lock().clone()
    }
}

impl BackendFactory for MapFactory {
    fn build(&self, spec: &str) -> Result<Arc<dyn GenerationBackend>, ProviderError> {
        self.built.lock().push(spec.to_string());
        self.backends
            .get(spec)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownBackend(spec.to_string()))
    }
}

/// In-memory skill cache that records every store request
pub struct SpyCache {
    inner: SqliteSkillCache,
    stores: Mutex<Vec<VerificationLog>>,
    lookups: Mutex<usize>,
}

impl SpyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteSkillCache::open_in_memory(None).unwrap(),
            stores: Mutex::new(Vec::new()),
            lookups: Mutex::new(0),
        })
    }

    pub fn stores(&self) -> Vec<VerificationLog> {
        self.stores.lock().clone()
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock()
    }
}

#[async_trait]
impl SkillCache for SpyCache {
    async fn retrieve(&self, query: &str) -> Result<Option<SkillMatch>> {
        *self.lookups.lock() += 1;
        self.inner.retrieve(query).await
    }

    async fn store(&self, code: &str, description: &str, log: &VerificationLog) -> Result<bool> {
        self.stores.lock().push(log.clone());
        self.inner.store(code, description, log).await
    }

    fn count(&self) -> Result<usize> {
        self.inner.count()
    }

    fn list(&self, limit: usize) -> Result<Vec<SkillRecord>> {
        self.inner.list(limit)
    }
}

/// Keeps whole documents and returns them in insertion order
pub struct MemoryRetriever {
    docs: Mutex<Vec<String>>,
}

impl MemoryRetriever {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            docs: Mutex::new(Vec::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }
}

#[async_trait]
impl ContextRetriever for MemoryRetriever {
    fn name(&self) -> &str {
        "memory retriever"
    }

    async fn add_document(&self, text: &str, _source: &str) -> Result<usize> {
        self.docs.lock().push(text.to_string());
        Ok(1)
    }

    async fn retrieve(&self, _query: &str, k: usize) -> Result<Vec<String>> {
        Ok(self.docs.lock().iter().take(k).cloned().collect())
    }
}

/// Serves fixed text for `paper.txt`; every other path is missing
pub struct StubIngest;

#[async_trait]
impl DocumentIngest for StubIngest {
    async fn ingest(&self, path: &Path) -> Result<String, IngestError> {
        if path.file_name().is_some_and(|n| n == "paper.txt") {
            Ok("Diffusion limited aggregation grows clusters from random walkers.".to_string())
        } else {
            Err(IngestError::NotFound(path.to_path_buf()))
        }
    }
}

/// Default wiring: one scripted backend for both roles
pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub runner: Arc<MarkerRunner>,
    pub cache: Arc<SpyCache>,
    pub retriever: Arc<MemoryRetriever>,
}

impl Harness {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self {
            backend: Arc::new(backend),
            runner: MarkerRunner::new(),
            cache: SpyCache::new(),
            retriever: MemoryRetriever::new(),
        }
    }

    pub fn components(&self, factory: MapFactory) -> Components {
        Components {
            synthesizer: self.backend.clone(),
            integrity: self.backend.clone(),
            factory: Arc::new(factory),
            runner: self.runner.clone(),
            cache: self.cache.clone(),
            retriever: self.retriever.clone(),
            ingest: Arc::new(StubIngest),
        }
    }
}
