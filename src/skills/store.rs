//! SQLite-backed skill cache

use super::{MatchMethod, SkillCache, SkillMatch, SkillRecord, VerificationLog};
use crate::embeddings::{decode_vector, encode_vector, rank_by_similarity, Embedder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SELECT_RECORD: &str =
    "SELECT id, description, code, code_hash, source, verified, created_at FROM skills";

pub struct SqliteSkillCache {
    conn: Mutex<Connection>,
    embedder: Option<Arc<dyn Embedder>>,
    min_similarity: Option<f32>,
}

impl SqliteSkillCache {
    /// Open or create the skill database
    pub fn open(path: &Path, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open skill cache at {}", path.display()))?;
        let cache = Self::with_connection(conn, embedder)?;

        info!("Skill cache opened: {}", path.display());
        Ok(cache)
    }

    pub fn open_in_memory(embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, embedder)
    }

    fn with_connection(conn: Connection, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(conn),
            embedder,
            min_similarity: None,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Reject semantic matches scoring below `floor`
    pub fn with_min_similarity(mut self, floor: Option<f32>) -> Self {
        self.min_similarity = floor;
        self
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                code TEXT NOT NULL,
                code_hash TEXT NOT NULL,
                source TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 1,
                embedding BLOB,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_skills_created ON skills(created_at DESC);

            CREATE VIRTUAL TABLE IF NOT EXISTS skills_fts USING fts5(
                description,
                content='skills',
                content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS skills_ai AFTER INSERT ON skills BEGIN
                INSERT INTO skills_fts(rowid, description) VALUES (new.rowid, new.description);
            END;
            "#,
        )?;
        Ok(())
    }

    fn hash_code(code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SkillRecord> {
        let created_at: i64 = row.get(6)?;
        Ok(SkillRecord {
            id: row.get(0)?,
            description: row.get(1)?,
            code: row.get(2)?,
            code_hash: row.get(3)?,
            source: row.get(4)?,
            verified: row.get::<_, i64>(5)? != 0,
            created_at: DateTime::<Utc>::from_timestamp(created_at, 0).unwrap_or_default(),
        })
    }

    fn get(&self, id: &str) -> Result<Option<SkillRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_RECORD),
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Cosine top-1 over every embedded skill
    fn search_semantic(&self, query_vec: &[f32]) -> Result<Option<(String, f32)>> {
        let candidates: Vec<(String, Vec<f32>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT id, embedding FROM skills WHERE embedding IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let bytes: Vec<u8> = row.get(1)?;
                    Ok((id, decode_vector(&bytes)))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        Ok(rank_by_similarity(query_vec, &candidates, 1).into_iter().next())
    }

    /// FTS5 bm25 top-1 on descriptions
    fn search_keyword(&self, query: &str) -> Result<Option<(String, f32)>> {
        let fts_query = query
            .split_whitespace()
            .map(|w| w.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
            .filter(|w| !w.is_empty())
            .map(|w| format!("\"{}\"", w))
            .collect::<Vec<_>>()
            .join(" OR ");

        if fts_query.is_empty() {
            return Ok(None);
        }

        let conn = self.conn.lock();
        let hit = conn
            .query_row(
                r#"
                SELECT s.id, bm25(skills_fts) AS score
                FROM skills_fts
                JOIN skills s ON skills_fts.rowid = s.rowid
                WHERE skills_fts MATCH ?1
                ORDER BY score
                LIMIT 1
                "#,
                params![fts_query],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?.abs() as f32)),
            )
            .optional()?;
        Ok(hit)
    }

    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Skill embedding failed, using keyword lookup: {}", e);
                None
            }
        }
    }

    fn has_embedded_skills(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM skills WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }
}

#[async_trait]
impl SkillCache for SqliteSkillCache {
    async fn retrieve(&self, query: &str) -> Result<Option<SkillMatch>> {
        if query.trim().is_empty() {
            return Ok(None);
        }

        let semantic = match self.embed_query(query).await {
            Some(query_vec) => {
                if self.has_embedded_skills()? {
                    Some(self.search_semantic(&query_vec)?)
                } else {
                    None
                }
            }
            None => None,
        };

        let (id, score, method) = match semantic {
            Some(Some((id, score))) => {
                if let Some(floor) = self.min_similarity {
                    if score < floor {
                        debug!("Best skill scored {:.3}, below floor {:.3}", score, floor);
                        return Ok(None);
                    }
                }
                (id, score, MatchMethod::Semantic)
            }
            Some(None) => return Ok(None),
            None => match self.search_keyword(query)? {
                Some((id, score)) => (id, score, MatchMethod::Keyword),
                None => return Ok(None),
            },
        };

        Ok(self.get(&id)?.map(|record| SkillMatch { record, score, method }))
    }

    async fn store(&self, code: &str, description: &str, log: &VerificationLog) -> Result<bool> {
        if !log.success {
            debug!("Refusing to cache unverified skill ({})", log.source);
            return Ok(false);
        }

        let embedding = self.embed_query(description).await.map(|v| encode_vector(&v));
        let id = uuid::Uuid::new_v4().to_string();
        let code_hash = Self::hash_code(code);

        self.conn.lock().execute(
            r#"
            INSERT INTO skills (id, description, code, code_hash, source, verified, embedding, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)
            "#,
            params![
                id,
                description,
                code,
                code_hash,
                log.source,
                embedding,
                Utc::now().timestamp()
            ],
        )?;

        info!("Stored verified skill {} ({})", &id[..8], code_hash);
        Ok(true)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM skills", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn list(&self, limit: usize) -> Result<Vec<SkillRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            SELECT_RECORD
        ))?;
        let records = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}
