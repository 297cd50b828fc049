//! Query request, trace and outcome types

use crate::grounding::GroundingVerdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Prefix of every failure that stopped the query before an answer existed
pub const ORCHESTRATOR_ERROR: &str = "Orchestrator Error:";

/// Prefix used when accepted code failed its real run
pub const EXECUTION_ERROR: &str = "Execution Error:";

/// Per-call backend choices. Any override forces fresh synthesis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOverrides {
    /// Backend spec for drafting and repair
    pub synthesizer: Option<String>,
    /// Backend spec for test generation and failure analysis
    pub integrity: Option<String>,
}

impl BackendOverrides {
    pub fn is_empty(&self) -> bool {
        self.synthesizer.is_none() && self.integrity.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub query: String,
    /// Data file reference appended to the synthesis context
    pub data_context: Option<String>,
    /// Document ingested into the knowledge store before answering
    pub paper: Option<PathBuf>,
    pub overrides: BackendOverrides,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_paper(mut self, path: impl Into<PathBuf>) -> Self {
        self.paper = Some(path.into());
        self
    }

    pub fn with_data_context(mut self, data: impl Into<String>) -> Self {
        self.data_context = Some(data.into());
        self
    }

    pub fn with_synthesizer_override(mut self, spec: impl Into<String>) -> Self {
        self.overrides.synthesizer = Some(spec.into());
        self
    }

    pub fn with_integrity_override(mut self, spec: impl Into<String>) -> Self {
        self.overrides.integrity = Some(spec.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Lookup skipped because the call carried overrides
    Bypassed,
}

/// Per-query record of which backend served each stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub stages: BTreeMap<String, String>,
    pub cache: CacheStatus,
    pub repair_cycles: u32,
    /// Non-fatal problems (failed ingestion, retrieval or review)
    pub warnings: Vec<String>,
}

impl Trace {
    pub(crate) fn new() -> Self {
        Self {
            stages: BTreeMap::new(),
            cache: CacheStatus::Miss,
            repair_cycles: 0,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn stage(&mut self, stage: &str, backend: impl Into<String>) {
        self.stages.insert(stage.to_string(), backend.into());
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn get(&self, stage: &str) -> Option<&str> {
        self.stages.get(stage).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// Freshly synthesized, verified and run
    Answered,
    /// Served from the skill cache and run
    CacheHit,
    /// Code exists but its real run failed
    ExecutionFailed,
    /// No code could be produced
    Failed,
}

/// Always-present result of a query: code, output or error text, and trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub code: String,
    pub output: String,
    pub trace: Trace,
    pub status: QueryStatus,
    pub review: Option<GroundingVerdict>,
}

impl QueryOutcome {
    pub(crate) fn failed(error: impl std::fmt::Display, trace: Trace) -> Self {
        Self {
            code: String::new(),
            output: format!("{} {}", ORCHESTRATOR_ERROR, error),
            trace,
            status: QueryStatus::Failed,
            review: None,
        }
    }

    pub(crate) fn execution_failed(code: String, error_log: &str, trace: Trace) -> Self {
        Self {
            code,
            output: format!("{} {}", EXECUTION_ERROR, error_log),
            trace,
            status: QueryStatus::ExecutionFailed,
            review: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Answered | QueryStatus::CacheHit)
    }

    pub fn into_parts(self) -> (String, String, Trace) {
        (self.code, self.output, self.trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_shape() {
        let outcome = QueryOutcome::failed("boom", Trace::new());
        assert!(!outcome.is_success());
        let (code, output, trace) = outcome.into_parts();
        assert!(code.is_empty());
        assert_eq!(output, "Orchestrator Error: boom");
        assert_eq!(trace.cache, CacheStatus::Miss);
    }

    #[test]
    fn test_overrides_empty() {
        assert!(BackendOverrides::default().is_empty());
        assert!(!QueryRequest::new("q").with_integrity_override("ollama/x").overrides.is_empty());
    }

    #[test]
    fn test_trace_serializes() {
        let mut trace = Trace::new();
        trace.stage("synthesizer", "gemini/gemini-2.0-flash");
        trace.cache = CacheStatus::Bypassed;
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["cache"], "bypassed");
        assert_eq!(json["stages"]["synthesizer"], "gemini/gemini-2.0-flash");
    }
}
