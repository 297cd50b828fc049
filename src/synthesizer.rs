//! Skill Synthesizer
//!
//! Drafts candidate programs from a query, repairs them from a critique,
//! and splits existing source files into reusable tools for the bulk build.

use crate::error::ProviderError;
use crate::integrity::{Candidate, Critique};
use crate::llm::text::{clean_code, truncate};
use crate::llm::GenerationBackend;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const DRAFT_SYSTEM_PROMPT: &str = "You are a Scientific Reasoning Agent.";
const FIX_SYSTEM_PROMPT: &str = "You are a code debugger.";
const EXTRACT_SYSTEM_PROMPT: &str = "You are a code extractor.";

/// Separator the extractor is asked to put between tools
pub const TOOL_DELIMITER: &str = "### FUNCTION ###";

/// Raw source longer than this is cut before extraction
const MAX_EXTRACT_CHARS: usize = 8000;

/// Blocks shorter than this are discarded as noise
const MIN_TOOL_CHARS: usize = 20;

static DEF_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"def\s+([A-Za-z0-9_]+)").expect("valid def-name regex"));

/// A reusable unit pulled out of existing code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTool {
    pub name: String,
    pub code: String,
    pub description: String,
}

#[derive(Clone)]
pub struct Synthesizer {
    backend: Arc<dyn GenerationBackend>,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// First candidate for `query`. The program must be self-contained and
    /// print its reasoning before its final answer.
    pub async fn draft(&self, query: &str, context: &str) -> Result<Candidate, ProviderError> {
        let context_block = if context.trim().is_empty() {
            String::new()
        } else {
            format!("\nReference material:\n{}\n", context)
        };

        let prompt = format!(
            r#"A user asks: "{query}"
{context_block}
Connect the ideas in the reference material to the user's domain, then answer with a program.

1. Concept mapping: name the key methods or concepts in the reference and what each corresponds to in the user's domain.
2. Reasoning: explain why that method applies here.
3. Implementation: write a Python script that
   - prints the concept mapping and reasoning to stdout,
   - computes or simulates the result with that method,
   - prints the FINAL ANSWER last.

Requirements:
- The script is self-contained: no missing files, credentials or undefined inputs.
- Reasoning is printed before the result.
- Return ONLY the code."#
        );

        let response = self.backend.generate(&prompt, Some(DRAFT_SYSTEM_PROMPT)).await?;
        let body = clean_code(&response);
        info!("Drafted candidate ({} chars) via {}", body.len(), self.backend.name());
        Ok(Candidate::drafted(body))
    }

    /// New candidate addressing `critique`. Whether the critique is actually
    /// resolved is for the next check to decide.
    pub async fn fix(&self, candidate: &Candidate, critique: &Critique) -> Result<Candidate, ProviderError> {
        let prompt = format!(
            r#"This Python code has problems:

{code}

Critique:
"{critique}"

Rewrite the code so the problems are gone. Return only the corrected code."#,
            code = candidate.body,
            critique = critique.text,
        );

        let response = self.backend.generate(&prompt, Some(FIX_SYSTEM_PROMPT)).await?;
        let next = Candidate::repaired(clean_code(&response), candidate, critique);
        debug!("Repaired candidate -> attempt {}", next.attempt);
        Ok(next)
    }

    /// Best-effort split of `raw` into independent named functions
    pub async fn extract_tools(&self, raw: &str, source: &str) -> Result<Vec<ExtractedTool>, ProviderError> {
        let prompt = format!(
            r#"Source: {source}

Code:
{code}

Find the reusable, independent functions or classes in this code. Tidy each one
(docstring, type hints) and output them one after another, each preceded by a line
containing exactly "{delimiter}":

{delimiter}
def function_name(...):
    """Docstring"""
    ...

{delimiter}
..."#,
            code = truncate(raw, MAX_EXTRACT_CHARS),
            delimiter = TOOL_DELIMITER,
        );

        let response = self.backend.generate(&prompt, Some(EXTRACT_SYSTEM_PROMPT)).await?;
        let tools = parse_tools(&response, source);
        info!("Extracted {} tools from {}", tools.len(), source);
        Ok(tools)
    }
}

fn parse_tools(response: &str, source: &str) -> Vec<ExtractedTool> {
    response
        .split(TOOL_DELIMITER)
        .map(clean_code)
        .filter(|code| code.len() > MIN_TOOL_CHARS && code.contains("def "))
        .map(|code| {
            let name = DEF_NAME
                .captures(&code)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "unknown_tool".to_string());
            ExtractedTool {
                name,
                code,
                description: format!("Extracted tool from {}", source),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::{CritiqueOrigin, Provenance};
    use crate::llm::mock::ScriptedBackend;

    #[tokio::test]
    async fn test_draft_includes_context() {
        let backend = Arc::new(
            ScriptedBackend::new("mock/synth").on("Scientific Reasoning Agent", &["```python\nprint('FINAL ANSWER: 4')\n```"]),
        );
        let synthesizer = Synthesizer::new(backend.clone());

        let candidate = synthesizer.draft("what is 2+2", "Arithmetic paper").await.unwrap();
        assert_eq!(candidate.body, "print('FINAL ANSWER: 4')");
        assert_eq!(candidate.provenance, Provenance::Drafted);
        assert!(backend.calls()[0].1.contains("Arithmetic paper"));
    }

    #[tokio::test]
    async fn test_draft_without_context_omits_block() {
        let backend = Arc::new(ScriptedBackend::new("mock/synth").on("Scientific Reasoning Agent", &["print(1)"]));
        Synthesizer::new(backend.clone()).draft("q", "  ").await.unwrap();
        assert!(!backend.calls()[0].1.contains("Reference material"));
    }

    #[tokio::test]
    async fn test_fix_produces_successor() {
        let backend = Arc::new(ScriptedBackend::new("mock/synth").on("code debugger", &["print(2)"]));
        let synthesizer = Synthesizer::new(backend.clone());

        let draft = Candidate::drafted("print(x)".to_string());
        let critique = Critique::new(CritiqueOrigin::Dynamic, "x is undefined");
        let fixed = synthesizer.fix(&draft, &critique).await.unwrap();

        assert_eq!(fixed.body, "print(2)");
        assert_eq!(fixed.attempt, 1);
        assert_eq!(draft.body, "print(x)");
        let prompt = &backend.calls()[0].1;
        assert!(prompt.contains("print(x)") && prompt.contains("x is undefined"));
    }

    #[test]
    fn test_parse_tools() {
        let response = "Here you go\n### FUNCTION ###\n```python\ndef mean(xs):\n    return sum(xs) / len(xs)\n```\n### FUNCTION ###\ndef x(): 1\n### FUNCTION ###\nclass Holder:\n    \"\"\"No functions in here at all\"\"\"\n";
        let tools = parse_tools(response, "stats.py");

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "mean");
        assert_eq!(tools[0].code, "def mean(xs):\n    return sum(xs) / len(xs)");
        assert_eq!(tools[0].description, "Extracted tool from stats.py");
    }

    #[tokio::test]
    async fn test_extract_tools_truncates_input() {
        let backend = Arc::new(ScriptedBackend::new("mock/synth").on("code extractor", &["nothing"]));
        let raw = "a".repeat(20_000);
        let tools = Synthesizer::new(backend.clone()).extract_tools(&raw, "big.py").await.unwrap();

        assert!(tools.is_empty());
        assert!(backend.calls()[0].1.len() < 9000);
    }
}
