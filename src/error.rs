//! Error Types
//!
//! One enum per failure family. Recoverable loop outcomes (static
//! rejection, failed test run, sandbox timeout) are data, not errors;
//! see `integrity::AttemptOutcome` and `sandbox::SandboxFailure`.

use std::path::PathBuf;
use thiserror::Error;

/// Generation backend failures
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{backend} is not configured: {reason}")]
    NotConfigured { backend: String, reason: String },

    #[error("{backend} request failed: {message}")]
    Request { backend: String, message: String },

    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("{backend} returned an empty response")]
    EmptyResponse { backend: String },

    #[error("Unknown backend spec '{0}'")]
    UnknownBackend(String),

    #[error("All backends exhausted: {0}")]
    Exhausted(String),
}

impl ProviderError {
    pub fn request(backend: &str, err: impl std::fmt::Display) -> Self {
        Self::Request {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }

    pub fn not_configured(backend: &str, reason: &str) -> Self {
        Self::NotConfigured {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Terminal failures of the verify/repair loop
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Failed to generate robust code after {attempts} attempts (last critique: {last_critique})")]
    Exhausted { attempts: u32, last_critique: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Document ingestion failures
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported document type: {0}")]
    Unsupported(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
