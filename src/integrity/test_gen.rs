//! Test case generation

use crate::error::ProviderError;
use crate::llm::text::{clean_code, truncate};
use crate::llm::GenerationBackend;
use std::sync::Arc;
use tracing::debug;

/// Printed by a generated test when its assertions hold
pub const TEST_SENTINEL: &str = "TEST PASSED";

const SYSTEM_PROMPT: &str = "You are a QA engineer.";

/// Task descriptions longer than this are cut before prompting
const MAX_TASK_CHARS: usize = 6000;

/// Writes a self-checking usage example for a candidate
#[derive(Clone)]
pub struct TestGenerator {
    backend: Arc<dyn GenerationBackend>,
}

impl TestGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Test code to append after the candidate. It asserts an expected
    /// outcome, prints [`TEST_SENTINEL`], and never redefines the code under test.
    pub async fn create(&self, task: &str) -> Result<String, ProviderError> {
        let prompt = format!(
            r#"Write a Python usage example that tests code written for this task:
"{task}"

Rules:
1. Assert the expected output or behaviour.
2. Print "{sentinel}" once every assertion has passed.
3. Do NOT define or redefine the function under test; it is already in scope.
4. Return ONLY the code."#,
            task = truncate(task, MAX_TASK_CHARS),
            sentinel = TEST_SENTINEL,
        );

        let response = self.backend.generate(&prompt, Some(SYSTEM_PROMPT)).await?;
        let test_case = clean_code(&response);
        debug!("Generated test case ({} chars)", test_case.len());
        Ok(test_case)
    }
}
