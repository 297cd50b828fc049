//! Chunked knowledge store
//!
//! Documents are split into overlapping character windows and kept in
//! SQLite. Retrieval ranks chunks by embedding similarity when an
//! embedder answers, and by FTS5 bm25 otherwise.

use super::ContextRetriever;
use crate::embeddings::{decode_vector, encode_vector, rank_by_similarity, Embedder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 100;

/// Split `text` into windows of `size` chars, each overlapping the previous by `overlap`
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}

pub struct KnowledgeStore {
    conn: Mutex<Connection>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl KnowledgeStore {
    pub fn open(path: &Path, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open knowledge store at {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
            embedder,
        };
        store.init_schema()?;

        info!("Knowledge store opened: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory(embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            embedder,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);

            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content,
                content='chunks',
                content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
            END;
            "#,
        )?;
        Ok(())
    }

    /// Number of stored chunks
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn search_semantic(&self, query_vec: &[f32], k: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT content, embedding FROM chunks WHERE embedding IS NOT NULL")?;
        let candidates: Vec<(String, Vec<f32>)> = stmt
            .query_map([], |row| {
                let content: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((content, decode_vector(&bytes)))
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rank_by_similarity(query_vec, &candidates, k)
            .into_iter()
            .map(|(content, _)| content)
            .collect())
    }

    fn search_keyword(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let fts_query = query
            .split_whitespace()
            .map(|w| w.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
            .filter(|w| !w.is_empty())
            .map(|w| format!("\"{}\"", w))
            .collect::<Vec<_>>()
            .join(" OR ");

        if fts_query.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT c.content, bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c ON chunks_fts.rowid = c.rowid
            WHERE chunks_fts MATCH ?1
            ORDER BY score
            LIMIT ?2
            "#,
        )?;
        let results = stmt
            .query_map(params![fts_query, k as i64], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(results)
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Chunk embedding failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ContextRetriever for KnowledgeStore {
    fn name(&self) -> &str {
        if self.embedder.is_some() {
            "SQLite knowledge store (vector)"
        } else {
            "SQLite knowledge store (keyword)"
        }
    }

    async fn add_document(&self, text: &str, source: &str) -> Result<usize> {
        let chunks = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            embeddings.push(self.embed(chunk).await.map(|v| encode_vector(&v)));
        }

        let now = Utc::now().timestamp();
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            for (index, (chunk, embedding)) in chunks.iter().zip(embeddings).enumerate() {
                tx.execute(
                    r#"
                    INSERT INTO chunks (id, source, chunk_index, content, embedding, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        source,
                        index as i64,
                        chunk,
                        embedding,
                        now
                    ],
                )?;
            }
            tx.commit()?;
        }

        info!("Added {} chunks from {} to knowledge base", chunks.len(), source);
        Ok(chunks.len())
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(vec![]);
        }

        if let Some(query_vec) = self.embed(query).await {
            let hits = self.search_semantic(&query_vec, k)?;
            if !hits.is_empty() {
                return Ok(hits);
            }
        }

        self.search_keyword(query, k)
    }
}
