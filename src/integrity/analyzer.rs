//! Failure analysis

use super::{Critique, CritiqueOrigin};
use crate::error::ProviderError;
use crate::llm::text::strip_think_blocks;
use crate::llm::GenerationBackend;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are an expert debugger.";

const MAX_LOG_CHARS: usize = 4000;

/// Turns a raw error log into a concise critique
#[derive(Clone)]
pub struct FailureAnalyzer {
    backend: Arc<dyn GenerationBackend>,
}

impl FailureAnalyzer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn analyze(&self, code: &str, error_log: &str) -> Result<Critique, ProviderError> {
        // Tracebacks end with the useful part
        let log = tail(error_log, MAX_LOG_CHARS);
        let prompt = format!(
            r#"This code failed when run.

Code:
{code}

Error output:
{log}

Explain the cause of the failure and give one specific fix. Be concise."#
        );

        let response = self.backend.generate(&prompt, Some(SYSTEM_PROMPT)).await?;
        let analysis = strip_think_blocks(&response);

        let text = if analysis.is_empty() {
            format!("Execution failed:\n{}", log)
        } else {
            analysis
        };
        Ok(Critique::new(CritiqueOrigin::Dynamic, text))
    }
}

/// Last `max` bytes of `s`, on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
