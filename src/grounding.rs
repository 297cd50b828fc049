//! Grounding review
//!
//! Optional plausibility check of a final answer against the question
//! that produced it. The verdict is advisory: a failed or unparsable
//! review never fails the query.

use crate::error::ProviderError;
use crate::llm::text::{strip_think_blocks, truncate};
use crate::llm::GenerationBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are a scientific reviewer.";

const MAX_OUTPUT_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingVerdict {
    pub valid: bool,
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    feedback: Option<String>,
}

pub struct GroundingReviewer {
    backend: Arc<dyn GenerationBackend>,
}

impl GroundingReviewer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Judge whether `output` is a plausible answer to `query`.
    /// Unparsable replies yield an invalid verdict; only backend failures are errors.
    pub async fn review(&self, query: &str, code: &str, output: &str) -> Result<GroundingVerdict, ProviderError> {
        let prompt = format!(
            r#"Is this result scientifically plausible for the question asked?

Question: "{query}"

Code executed:
{code}

Output:
{output}

Reply with a single JSON object and nothing else:
{{"valid": true or false, "feedback": "your reasoning"}}"#,
            output = truncate(output, MAX_OUTPUT_CHARS),
        );

        let response = self.backend.generate(&prompt, Some(SYSTEM_PROMPT)).await?;
        let verdict = parse_verdict(&response);
        debug!("Grounding verdict: valid={}", verdict.valid);
        Ok(verdict)
    }
}

fn parse_verdict(response: &str) -> GroundingVerdict {
    let cleaned = strip_think_blocks(response);
    match extract_verdict(&cleaned) {
        Ok(raw) => GroundingVerdict {
            valid: raw.valid,
            feedback: raw
                .feedback
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| "No feedback provided".to_string()),
        },
        Err(e) => {
            warn!("Could not parse grounding reply: {}", e);
            GroundingVerdict {
                valid: false,
                feedback: format!("Grounding check failed to parse: {}", e),
            }
        }
    }
}

/// First verdict object embedded in `s`; trailing prose is ignored
fn extract_verdict(s: &str) -> Result<RawVerdict, String> {
    let mut first_error = None;

    for (start, _) in s.match_indices('{') {
        match serde_json::Deserializer::from_str(&s[start..])
            .into_iter::<RawVerdict>()
            .next()
        {
            Some(Ok(raw)) => return Ok(raw),
            Some(Err(e)) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
            None => {}
        }
    }
    Err(first_error.unwrap_or_else(|| "no JSON object in reply".to_string()))
}
