//! Integrity Controller

use super::{
    AttemptOutcome, AttemptRecord, Candidate, Critique, CritiqueOrigin, FailureAnalyzer, IntegrityReport,
    StaticPolicy, StaticVerdict, TestGenerator,
};
use crate::error::IntegrityError;
use crate::sandbox::ScriptRunner;
use crate::synthesizer::Synthesizer;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Drives the bounded check → test → execute → analyze → repair loop.
///
/// Built per query: it holds the backends chosen for that query and
/// nothing else, so two controllers never share mutable state.
pub struct IntegrityController {
    synthesizer: Synthesizer,
    test_generator: TestGenerator,
    analyzer: FailureAnalyzer,
    runner: Arc<dyn ScriptRunner>,
    policy: Arc<StaticPolicy>,
    max_attempts: u32,
}

impl IntegrityController {
    pub fn new(
        synthesizer: Synthesizer,
        test_generator: TestGenerator,
        analyzer: FailureAnalyzer,
        runner: Arc<dyn ScriptRunner>,
    ) -> Self {
        Self {
            synthesizer,
            test_generator,
            analyzer,
            runner,
            policy: Arc::new(StaticPolicy::default()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_policy(mut self, policy: Arc<StaticPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Values below 1 are raised to 1
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backend name serving test generation and analysis
    pub fn backend_name(&self) -> &str {
        self.test_generator.backend_name()
    }

    /// Verify `draft`, repairing until a test run passes or the budget is spent.
    ///
    /// `task` is the description the test generator writes tests against.
    /// Attempts are strictly sequential. No unverified candidate is ever
    /// returned as success.
    pub async fn run(&self, draft: Candidate, task: &str) -> Result<IntegrityReport, IntegrityError> {
        let mut current = draft;
        let mut attempts = Vec::with_capacity(self.max_attempts as usize);

        for attempt in 1..=self.max_attempts {
            let (outcome, critique) = match self.policy.check(&current.body) {
                StaticVerdict::Reject(reason) => {
                    warn!("Attempt {}: static check rejected candidate ({})", attempt, reason);
                    let critique = Critique::new(CritiqueOrigin::Static, static_critique(&reason));
                    (AttemptOutcome::StaticRejection { reason }, critique)
                }
                StaticVerdict::Accept => {
                    let test_case = self.test_generator.create(task).await?;
                    let script = format!("{}\n\n{}", current.body, test_case);
                    let result = self.runner.run(&script).await;

                    if result.success {
                        info!("Attempt {}: candidate passed verification", attempt);
                        attempts.push(AttemptRecord {
                            attempt,
                            outcome: AttemptOutcome::Passed,
                            critique_id: None,
                        });
                        return Ok(IntegrityReport {
                            accepted: current,
                            verification: result,
                            attempts,
                        });
                    }

                    warn!(
                        "Attempt {}: test run failed{}",
                        attempt,
                        if result.is_timeout() { " (timeout)" } else { "" }
                    );
                    let critique = self.analyzer.analyze(&current.body, &result.error_log).await?;
                    (
                        AttemptOutcome::DynamicFailure {
                            error_log: result.error_log,
                            failure: result.failure,
                        },
                        critique,
                    )
                }
            };

            debug!("Critique {}: {}", critique.id, critique.text);
            let is_last = attempt == self.max_attempts;
            attempts.push(AttemptRecord {
                attempt,
                outcome,
                critique_id: (!is_last).then(|| critique.id.clone()),
            });

            if is_last {
                return Err(IntegrityError::Exhausted {
                    attempts: self.max_attempts,
                    last_critique: critique.text,
                });
            }

            current = self.synthesizer.fix(&current, &critique).await?;
        }

        // max_attempts >= 1, so the loop always returns
        Err(IntegrityError::Exhausted {
            attempts: self.max_attempts,
            last_critique: String::new(),
        })
    }
}

fn static_critique(reason: &str) -> String {
    format!(
        "Code failed the static safety check: {}. Restricted imports (subprocess, sys, shutil) \
         and shell or recursive-delete calls are not allowed. Rewrite it without them.",
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedBackend;
    use crate::sandbox::ExecutionResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Passes scripts containing a marker, fails the rest
    struct MarkerRunner {
        pass_marker: &'static str,
        scripts: Mutex<Vec<String>>,
    }

    impl MarkerRunner {
        fn new(pass_marker: &'static str) -> Arc<Self> {
            Arc::new(Self {
                pass_marker,
                scripts: Mutex::new(Vec::new()),
            })
        }

        fn runs(&self) -> usize {
            self.scripts.lock().len()
        }
    }

    #[async_trait]
    impl ScriptRunner for MarkerRunner {
        fn name(&self) -> &str {
            "marker"
        }

        async fn run(&self, script: &str) -> ExecutionResult {
            self.scripts.lock().push(script.to_string());
            ExecutionResult {
                success: script.contains(self.pass_marker),
                stdout: String::new(),
                error_log: if script.contains(self.pass_marker) {
                    String::new()
                } else {
                    "AssertionError".to_string()
                },
                failure: None,
                truncated: false,
                duration_ms: 1,
            }
        }
    }

    fn controller(backend: Arc<ScriptedBackend>, runner: Arc<MarkerRunner>) -> IntegrityController {
        IntegrityController::new(
            Synthesizer::new(backend.clone()),
            TestGenerator::new(backend.clone()),
            FailureAnalyzer::new(backend),
            runner,
        )
    }

    #[tokio::test]
    async fn test_passes_first_time() {
        let backend = Arc::new(ScriptedBackend::new("mock").on("QA engineer", &["assert good() == 1"]));
        let runner = MarkerRunner::new("GOOD");
        let ctl = controller(backend.clone(), runner.clone());

        let report = ctl
            .run(Candidate::drafted("def good():\n    return 1  # GOOD".to_string()), "task")
            .await
            .unwrap();

        assert_eq!(report.repair_cycles(), 0);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Passed);
        assert_eq!(runner.runs(), 1);
        assert_eq!(backend.calls_matching("code debugger"), 0);
    }

    #[tokio::test]
    async fn test_repairs_after_dynamic_failure() {
        let backend = Arc::new(
            ScriptedBackend::new("mock")
                .on("QA engineer", &["assert f() == 2"])
                .on("expert debugger", &["f returns the wrong value"])
                .on("code debugger", &["def f():\n    return 2  # GOOD"]),
        );
        let runner = MarkerRunner::new("GOOD");
        let ctl = controller(backend.clone(), runner.clone());

        let report = ctl
            .run(Candidate::drafted("def f():\n    return 1".to_string()), "task")
            .await
            .unwrap();

        assert_eq!(report.accepted.attempt, 1);
        assert!(report.accepted.body.contains("return 2"));
        assert_eq!(report.repair_cycles(), 1);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::DynamicFailure { .. }));
        assert!(report.verification.success);
        assert_eq!(runner.runs(), 2);
    }

    #[tokio::test]
    async fn test_static_rejection_skips_execution() {
        let backend = Arc::new(
            ScriptedBackend::new("mock")
                .on("QA engineer", &["print('TEST PASSED')"])
                .on("code debugger", &["print('safe')  # GOOD"]),
        );
        let runner = MarkerRunner::new("GOOD");
        let ctl = controller(backend.clone(), runner.clone());

        let report = ctl
            .run(Candidate::drafted("import subprocess\nsubprocess.run(['ls'])".to_string()), "task")
            .await
            .unwrap();

        assert_eq!(runner.runs(), 1);
        assert!(matches!(
            report.attempts[0].outcome,
            AttemptOutcome::StaticRejection { .. }
        ));
        let (_, fix_prompt) = backend
            .calls()
            .into_iter()
            .find(|(s, _)| s.as_deref() == Some("You are a code debugger."))
            .unwrap();
        assert!(fix_prompt.contains("static safety check"));
    }

    #[tokio::test]
    async fn test_always_failing_terminates_within_budget() {
        let backend = Arc::new(
            ScriptedBackend::new("mock")
                .on("QA engineer", &["assert False"])
                .on("expert debugger", &["still broken"])
                .on("code debugger", &["def f():\n    return 0"]),
        );
        let runner = MarkerRunner::new("NEVER");
        let ctl = controller(backend.clone(), runner.clone()).with_max_attempts(3);

        let err = ctl
            .run(Candidate::drafted("def f():\n    return 0".to_string()), "task")
            .await
            .unwrap_err();

        match err {
            IntegrityError::Exhausted { attempts, last_critique } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_critique, "still broken");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(runner.runs(), 3);
        // No repair after the final attempt
        assert_eq!(backend.calls_matching("code debugger"), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        // No QA route: the backend errors on test generation
        let backend = Arc::new(ScriptedBackend::new("mock"));
        let ctl = controller(backend, MarkerRunner::new("GOOD"));

        let err = ctl
            .run(Candidate::drafted("print(1)".to_string()), "task")
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrityError::Provider(_)));
    }

    #[test]
    fn test_zero_budget_raised_to_one() {
        let backend = Arc::new(ScriptedBackend::new("mock"));
        let ctl = controller(backend, MarkerRunner::new("GOOD")).with_max_attempts(0);
        assert_eq!(ctl.max_attempts(), 1);
    }
}
