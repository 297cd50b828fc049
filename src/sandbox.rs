//! Sandbox Executor
//!
//! Runs a script as a fresh interpreter process inside a single-use
//! temporary directory:
//! - Hard wall-clock timeout (child killed on expiry)
//! - stdout and stderr captured separately, with size limits
//! - Environment sanitization (allowlisted variables only)
//! - Workspace removed on every exit path
//!
//! This guards against accidents, not adversaries. Generated code is
//! screened by the static check in `integrity` before it gets here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Error log text for a timed-out run
pub const TIMEOUT_MESSAGE: &str = "Execution Timed Out";

/// Prefix for failures of the sandbox itself, as opposed to the script
pub const SANDBOX_ERROR_PREFIX: &str = "Sandbox Error:";

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter binary
    pub interpreter: String,
    /// Extension given to the script file
    pub script_extension: String,
    /// Maximum execution time
    pub timeout: Duration,
    /// Maximum captured stdout in bytes (stderr gets a quarter)
    pub max_output_bytes: usize,
    /// Environment variables to pass through
    pub allowed_env_vars: HashSet<String>,
    /// Additional environment variables to set
    pub extra_env: Vec<(String, String)>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_extension: "py".to_string(),
            timeout: Duration::from_secs(10),
            max_output_bytes: 1024 * 1024, // 1 MB
            allowed_env_vars: default_allowed_env_vars(),
            extra_env: vec![("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string())],
        }
    }
}

impl SandboxConfig {
    /// Python sandbox with a custom interpreter and timeout
    pub fn python(interpreter: &str, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            timeout,
            ..Default::default()
        }
    }
}

/// Default allowed environment variables
fn default_allowed_env_vars() -> HashSet<String> {
    ["PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TZ"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Why the sandbox, rather than the script, ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxFailure {
    /// Wall-clock limit reached, process killed
    Timeout,
    /// Workspace or process could not be set up
    Launch,
}

/// Outcome of one sandbox invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    /// stderr of a failed run, or the sandbox's own error text
    pub error_log: String,
    /// Set when the sandbox ended the run
    pub failure: Option<SandboxFailure>,
    /// Whether stdout was truncated
    pub truncated: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn timed_out(duration_ms: u64) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            error_log: TIMEOUT_MESSAGE.to_string(),
            failure: Some(SandboxFailure::Timeout),
            truncated: false,
            duration_ms,
        }
    }

    pub fn launch_error(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            error_log: format!("{} {}", SANDBOX_ERROR_PREFIX, message),
            failure: Some(SandboxFailure::Launch),
            truncated: false,
            duration_ms: 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.failure == Some(SandboxFailure::Timeout)
    }
}

/// Script execution capability
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Identifier recorded in traces
    fn name(&self) -> &str;

    /// Run `script` to completion or timeout. Never fails: sandbox
    /// problems are reported inside the result.
    async fn run(&self, script: &str) -> ExecutionResult;
}

/// Subprocess sandbox on the local machine
pub struct LocalSandbox {
    config: SandboxConfig,
}

impl LocalSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    async fn execute_in(&self, workdir: &Path, script: &str) -> ExecutionResult {
        let start = Instant::now();
        let script_path = workdir.join(format!("skill.{}", self.config.script_extension));

        if let Err(e) = tokio::fs::write(&script_path, script).await {
            return ExecutionResult::launch_error(format!("failed to write script: {}", e));
        }

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&script_path)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();

        for var in &self.config.allowed_env_vars {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        for (key, value) in &self.config.extra_env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::launch_error(format!(
                    "failed to launch '{}': {}",
                    self.config.interpreter, e
                ))
            }
        };

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => return ExecutionResult::launch_error("output pipes unavailable"),
        };

        let max_stdout = self.config.max_output_bytes;
        let max_stderr = (self.config.max_output_bytes / 4).max(1);

        let result = tokio::time::timeout(self.config.timeout, async {
            let (out, err) = tokio::try_join!(read_capped(stdout, max_stdout), read_capped(stderr, max_stderr))?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status))
        })
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(((stdout_buf, truncated), (stderr_buf, _), status))) => {
                let success = status.success();
                let stdout = String::from_utf8_lossy(&stdout_buf).to_string();
                let error_log = if success {
                    String::new()
                } else {
                    let stderr = String::from_utf8_lossy(&stderr_buf).trim_end().to_string();
                    if stderr.is_empty() {
                        format!("Process exited with {}", status)
                    } else {
                        stderr
                    }
                };

                debug!(
                    "Sandbox run finished: success={}, {}ms, stdout={}B",
                    success,
                    duration_ms,
                    stdout.len()
                );

                ExecutionResult {
                    success,
                    stdout,
                    error_log,
                    failure: None,
                    truncated,
                    duration_ms,
                }
            }
            Ok(Err(e)) => ExecutionResult::launch_error(format!("failed while collecting output: {}", e)),
            Err(_) => {
                // kill_on_drop covers the case where kill itself fails
                let _ = child.kill().await;
                warn!("Sandboxed script timed out after {:?}", self.config.timeout);
                ExecutionResult::timed_out(duration_ms)
            }
        }
    }
}

impl Default for LocalSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl ScriptRunner for LocalSandbox {
    fn name(&self) -> &str {
        "Local Sandbox"
    }

    async fn run(&self, script: &str) -> ExecutionResult {
        // Dropping the TempDir removes the workspace, whichever way we leave
        let workdir = match tempfile::Builder::new().prefix("skillforge-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return ExecutionResult::launch_error(format!("failed to create workspace: {}", e)),
        };

        self.execute_in(workdir.path(), script).await
    }
}

/// Read to EOF, keeping at most `max` bytes. The rest is drained so the
/// child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = max.saturating_sub(buf.len());
        if n <= room {
            buf.extend_from_slice(&chunk[..n]);
        } else {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}
