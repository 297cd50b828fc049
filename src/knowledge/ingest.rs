//! Document ingestion

use crate::error::IngestError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Document to text conversion
#[async_trait]
pub trait DocumentIngest: Send + Sync {
    async fn ingest(&self, path: &Path) -> Result<String, IngestError>;
}

/// Reads text files directly and PDFs through `pdftotext`
#[derive(Debug, Clone)]
pub struct FileIngest {
    pdftotext: String,
}

impl FileIngest {
    pub fn new() -> Self {
        Self {
            pdftotext: "pdftotext".to_string(),
        }
    }

    /// Use a specific `pdftotext` binary
    pub fn with_pdftotext(binary: &str) -> Self {
        Self {
            pdftotext: binary.to_string(),
        }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<String, IngestError> {
        let output = Command::new(&self.pdftotext)
            .arg("-layout")
            .arg(path)
            .arg("-")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| IngestError::Extraction(format!("failed to run {}: {}", self.pdftotext, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IngestError::Extraction(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for FileIngest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentIngest for FileIngest {
    async fn ingest(&self, path: &Path) -> Result<String, IngestError> {
        if !path.exists() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        info!("Ingesting file: {}", path.display());

        let text = if extension == "pdf" {
            self.extract_pdf(path).await?
        } else {
            let bytes = tokio::fs::read(path).await?;
            String::from_utf8(bytes).map_err(|_| {
                IngestError::Unsupported(if extension.is_empty() {
                    "binary file".to_string()
                } else {
                    format!(".{}", extension)
                })
            })?
        };

        debug!("Extracted {} chars from {}", text.len(), path.display());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = FileIngest::new()
            .ingest(Path::new("/definitely/not/here.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reads_markdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.md");
        std::fs::write(&path, "# Method\nWe fit a line.").unwrap();

        let text = FileIngest::new().ingest(&path).await.unwrap();
        assert!(text.contains("We fit a line."));
    }

    #[tokio::test]
    async fn test_binary_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x9f]).unwrap();

        let err = FileIngest::new().ingest(&path).await.unwrap_err();
        assert!(matches!(err, IngestError::Unsupported(ref ext) if ext == ".bin"));
    }

    #[tokio::test]
    async fn test_missing_pdftotext_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let err = FileIngest::with_pdftotext("skillforge-no-such-pdftotext")
            .ingest(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
    }
}
