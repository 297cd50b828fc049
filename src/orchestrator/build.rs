//! Offline bulk build
//!
//! Turns an existing codebase into cached skills. Extracted tools pass
//! the same static check as synthesized code, and their definitions must
//! load in the sandbox before they are stored.

use super::Orchestrator;
use crate::knowledge::CodeScanner;
use crate::skills::VerificationLog;
use crate::synthesizer::{ExtractedTool, Synthesizer};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub files_scanned: usize,
    pub tools_extracted: usize,
    pub tools_stored: usize,
    /// Tools dropped by the static check or a failed load
    pub tools_rejected: usize,
    /// Files whose extraction call failed
    pub files_failed: usize,
}

impl Orchestrator {
    /// Scan `root`, extract tools from every source file, and cache the ones that verify
    pub async fn build_from_codebase(&self, root: &Path) -> BuildReport {
        let files = CodeScanner::new().scan(root);
        info!("Found {} code files in {}", files.len(), root.display());

        let synthesizer = Synthesizer::new(self.synthesizer.clone());
        let mut report = BuildReport {
            files_scanned: files.len(),
            ..Default::default()
        };

        for file in &files {
            let source = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.path.display().to_string());

            let tools = match synthesizer.extract_tools(&file.content, &source).await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!("Failed to extract from {}: {}", file.path.display(), e);
                    report.files_failed += 1;
                    continue;
                }
            };
            report.tools_extracted += tools.len();

            for tool in tools {
                if self.store_tool(&tool).await {
                    report.tools_stored += 1;
                } else {
                    report.tools_rejected += 1;
                }
            }
        }

        info!(
            "Build complete: {} stored, {} rejected, {} files failed",
            report.tools_stored, report.tools_rejected, report.files_failed
        );
        report
    }

    async fn store_tool(&self, tool: &ExtractedTool) -> bool {
        if let crate::integrity::StaticVerdict::Reject(reason) = self.policy.check(&tool.code) {
            warn!("  x {} rejected: {}", tool.name, reason);
            return false;
        }

        let result = self.runner.run(&tool.code).await;
        if !result.success {
            warn!("  x {} failed to load: {}", tool.name, result.error_log.lines().last().unwrap_or(""));
            return false;
        }

        let description = format!("{}: {}", tool.name, tool.description);
        let log = VerificationLog::from_execution(&result, "bulk-build");
        match self.cache.store(&tool.code, &description, &log).await {
            Ok(stored) => {
                if stored {
                    info!("  + Stored tool: {}", tool.name);
                }
                stored
            }
            Err(e) => {
                warn!("  x {} could not be stored: {}", tool.name, e);
                false
            }
        }
    }
}
