//! Reference Material
//!
//! Everything the synthesizer reads besides the query itself:
//! - [`FileIngest`] turns a document path into text
//! - [`KnowledgeStore`] chunks that text and serves nearest chunks back
//! - [`CodeScanner`] collects source files for the offline bulk build

pub mod ingest;
pub mod scanner;
pub mod store;

pub use ingest::{DocumentIngest, FileIngest};
pub use scanner::{CodeScanner, SourceFile, SourceKind};
pub use store::{chunk_text, KnowledgeStore, CHUNK_OVERLAP, CHUNK_SIZE};

use anyhow::Result;
use async_trait::async_trait;

/// Context lookup for the synthesis prompt
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Identifier recorded in traces
    fn name(&self) -> &str;

    /// Chunk and index `text` under `source`; returns the chunk count
    async fn add_document(&self, text: &str, source: &str) -> Result<usize>;

    /// Up to `k` chunks, most relevant first. Empty means no context.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>>;
}
