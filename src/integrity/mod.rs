//! Integrity Loop
//!
//! Bounded verify/repair cycle over a single candidate lineage:
//!
//! ```text
//!           ┌──────── reject ─────────┐
//!           ▼                         │
//! draft → Check ── accept → TestGen → Execute ── pass → DONE
//!           ▲                         │
//!           └── Repair ← Analyze ← fail
//! ```
//!
//! Static rejections and failed runs are not errors; they become a
//! [`Critique`] and feed the next repair. Only budget exhaustion and
//! backend failures leave the loop as [`IntegrityError`](crate::error::IntegrityError).

pub mod analyzer;
pub mod controller;
pub mod static_check;
pub mod test_gen;

pub use analyzer::FailureAnalyzer;
pub use controller::{IntegrityController, DEFAULT_MAX_ATTEMPTS};
pub use static_check::{StaticPolicy, StaticVerdict};
pub use test_gen::{TestGenerator, TEST_SENTINEL};

use crate::sandbox::{ExecutionResult, SandboxFailure};
use serde::{Deserialize, Serialize};

/// Where a candidate came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Drafted,
    Repaired { critique_id: String },
}

/// Unverified code under evaluation. Repairs supersede, never mutate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub body: String,
    pub provenance: Provenance,
    /// 0 for the draft, +1 per repair
    pub attempt: u32,
}

impl Candidate {
    pub fn drafted(body: String) -> Self {
        Self {
            body,
            provenance: Provenance::Drafted,
            attempt: 0,
        }
    }

    /// Successor of `previous` produced in answer to `critique`
    pub fn repaired(body: String, previous: &Candidate, critique: &Critique) -> Self {
        Self {
            body,
            provenance: Provenance::Repaired {
                critique_id: critique.id.clone(),
            },
            attempt: previous.attempt + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueOrigin {
    Static,
    Dynamic,
}

/// Diagnosis of a failed candidate, consumed by the next repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub id: String,
    pub origin: CritiqueOrigin,
    pub text: String,
}

impl Critique {
    pub fn new(origin: CritiqueOrigin, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            origin,
            text: text.into(),
        }
    }
}

/// What happened on one pass through the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    StaticRejection {
        reason: String,
    },
    DynamicFailure {
        error_log: String,
        failure: Option<SandboxFailure>,
    },
    Passed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Critique handed to the repair that followed, if any
    pub critique_id: Option<String>,
}

/// Terminal success of the loop
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub accepted: Candidate,
    /// The passing test-harness run
    pub verification: ExecutionResult,
    pub attempts: Vec<AttemptRecord>,
}

impl IntegrityReport {
    pub fn repair_cycles(&self) -> u32 {
        self.attempts.len().saturating_sub(1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_supersedes_lineage() {
        let draft = Candidate::drafted("print(1)".to_string());
        let critique = Critique::new(CritiqueOrigin::Dynamic, "NameError");
        let next = Candidate::repaired("print(2)".to_string(), &draft, &critique);

        assert_eq!(draft.attempt, 0);
        assert_eq!(draft.body, "print(1)");
        assert_eq!(next.attempt, 1);
        assert_eq!(
            next.provenance,
            Provenance::Repaired {
                critique_id: critique.id.clone()
            }
        );
    }

    #[test]
    fn test_critique_ids_unique() {
        let a = Critique::new(CritiqueOrigin::Static, "x");
        let b = Critique::new(CritiqueOrigin::Static, "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_repair_cycles() {
        let record = |attempt, outcome| AttemptRecord {
            attempt,
            outcome,
            critique_id: None,
        };
        let report = IntegrityReport {
            accepted: Candidate::drafted(String::new()),
            verification: ExecutionResult::timed_out(0),
            attempts: vec![
                record(
                    1,
                    AttemptOutcome::StaticRejection {
                        reason: "import of 'subprocess'".to_string(),
                    },
                ),
                record(2, AttemptOutcome::Passed),
            ],
        };
        assert_eq!(report.repair_cycles(), 1);
    }
}
