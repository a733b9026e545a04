//! SQLite knowledge index.
//!
//! Chunks live in one table with their embedding as a little-endian f32
//! blob. Search loads the candidate rows (optionally filtered by source)
//! and ranks them by cosine similarity in process, which is adequate for
//! the few thousand chunks a product knowledge base holds.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use turnstile_core::KnowledgeError;

use crate::vector::{blob_to_embedding, embedding_to_blob, rank_chunks};
use crate::{KnowledgeChunk, KnowledgeIndex, SearchOptions, StoredChunk};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (creating if missing) the index at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral index.
    pub async fn new(path: &str) -> Result<Self, KnowledgeError> {
        let in_memory = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| KnowledgeError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| KnowledgeError::Storage(format!("Failed to open SQLite: {e}")))?;

        let index = Self { pool };
        index.run_migrations().await?;
        info!("SQLite knowledge index initialized at {path}");
        Ok(index)
    }

    async fn run_migrations(&self) -> Result<(), KnowledgeError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_chunks (
                id           TEXT PRIMARY KEY,
                source       TEXT NOT NULL,
                chunk_index  INTEGER NOT NULL,
                content      TEXT NOT NULL,
                embedding    BLOB NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| KnowledgeError::Storage(format!("knowledge_chunks table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_knowledge_source ON knowledge_chunks(source)")
            .execute(&self.pool)
            .await
            .map_err(|e| KnowledgeError::Storage(format!("source index: {e}")))?;

        debug!("SQLite knowledge migrations complete");
        Ok(())
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<StoredChunk, KnowledgeError> {
        let get_err = |col: &str, e: sqlx::Error| KnowledgeError::Search(format!("{col} column: {e}"));

        let id: String = row.try_get("id").map_err(|e| get_err("id", e))?;
        let source: String = row.try_get("source").map_err(|e| get_err("source", e))?;
        let chunk_index: i64 = row.try_get("chunk_index").map_err(|e| get_err("chunk_index", e))?;
        let content: String = row.try_get("content").map_err(|e| get_err("content", e))?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(|e| get_err("embedding", e))?;

        Ok(StoredChunk {
            id,
            content,
            source,
            chunk_index: chunk_index.max(0) as usize,
            embedding: blob_to_embedding(&blob),
        })
    }
}

#[async_trait]
impl KnowledgeIndex for SqliteIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<usize, KnowledgeError> {
        let created_at = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KnowledgeError::Storage(format!("begin: {e}")))?;

        for chunk in &chunks {
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks (id, source, chunk_index, content, embedding, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    chunk_index = excluded.chunk_index,
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(embedding_to_blob(&chunk.embedding))
            .bind(&created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| KnowledgeError::Storage(format!("INSERT failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| KnowledgeError::Storage(format!("commit: {e}")))?;
        Ok(chunks.len())
    }

    async fn search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
        let rows = match &options.filter_source {
            Some(source) => {
                sqlx::query("SELECT * FROM knowledge_chunks WHERE source = ?1")
                    .bind(source)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM knowledge_chunks")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| KnowledgeError::Search(format!("Vector scan: {e}")))?;

        let stored: Vec<StoredChunk> = rows
            .iter()
            .map(Self::row_to_chunk)
            .collect::<Result<_, _>>()?;

        Ok(rank_chunks(&stored, embedding, options))
    }

    async fn delete_source(&self, source: &str) -> Result<usize, KnowledgeError> {
        let result = sqlx::query("DELETE FROM knowledge_chunks WHERE source = ?1")
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(|e| KnowledgeError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize, KnowledgeError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| KnowledgeError::Search(format!("COUNT failed: {e}")))?;
        Ok(count as usize)
    }
}
