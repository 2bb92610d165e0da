//! SQLite implementation of the retrieval store.
//!
//! ## Database Schema
//!
//! ```sql
//! -- Documents table: one row per unique uploaded file
//! CREATE TABLE documents (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     title TEXT,
//!     source_url TEXT,
//!     content_hash BLOB UNIQUE,        -- blake3 hash (32 bytes)
//!     language TEXT,                   -- NULL = unspecified
//!     status TEXT,                     -- pending | indexed | failed
//!     created_at INTEGER,
//!     updated_at INTEGER
//! );
//!
//! -- Chunks table: token windows with embeddings
//! CREATE TABLE chunks (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     document_id INTEGER REFERENCES documents(id) ON DELETE CASCADE,
//!     seq_index INTEGER,               -- zero-based window position
//!     content TEXT,
//!     embedding BLOB,                  -- f16 vector (optional)
//!     model_id TEXT,                   -- embedding model identity
//!     metadata TEXT,                   -- JSON (page number, offsets, ...)
//!     created_at INTEGER,
//!     UNIQUE(document_id, seq_index)
//! );
//! ```
//!
//! ## Search
//!
//! Both candidate queries load the eligible chunk set (indexed parent,
//! embedding present, language match-or-unset) and score it in-process:
//! cosine over the stored f16 vectors for the dense signal, padded-trigram
//! Jaccard for the lexical signal. At single-authority corpus scale this
//! scan is cheap; an ANN-backed [`DocumentStore`] implementation can replace
//! this one behind the same trait.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::lexical;
use super::{
    CandidateChunk, ChunkRecord, ContentHash, Document, DocumentDraft, DocumentId, DocumentStatus,
    DocumentStore, DocumentSummary, NewChunk, StoreStats,
};

/// Database file name, created inside the base directory.
pub const DB_FILE_NAME: &str = ".regqa.db";

const CANDIDATE_COLUMNS: &str = "c.id, c.document_id, c.seq_index, c.content, c.embedding, \
     c.model_id, c.metadata, c.created_at, \
     d.title AS doc_title, d.source_url AS doc_source_url, \
     d.language AS doc_language, d.created_at AS doc_created_at";

/// SQLite-backed [`DocumentStore`].
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the store with persistent storage under `base`.
    pub async fn open(base: &Path) -> Result<Self> {
        let db_path = base.join(DB_FILE_NAME);

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Opens an in-memory store for testing.
    pub async fn open_memory() -> Result<Self> {
        // One connection only: every connection to sqlite::memory: gets its
        // own private database.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                source_url TEXT,
                content_hash BLOB NOT NULL,
                language TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CONSTRAINT unique_content UNIQUE(content_hash)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                seq_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                model_id TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                CONSTRAINT unique_chunk UNIQUE(document_id, seq_index),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Get the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn document_from_row(row: &SqliteRow) -> Result<Document> {
        let hash_bytes: Vec<u8> = row.get("content_hash");
        if hash_bytes.len() != 32 {
            bail!("content hash has {} bytes, expected 32", hash_bytes.len());
        }
        let mut content_hash = [0u8; 32];
        content_hash.copy_from_slice(&hash_bytes);

        let status_str: String = row.get("status");
        let status = DocumentStatus::parse(&status_str)
            .with_context(|| format!("unknown document status: {status_str}"))?;

        Ok(Document {
            id: row.get("id"),
            title: row.get("title"),
            source_url: row.get("source_url"),
            content_hash,
            language: row.get("language"),
            status,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn chunk_from_row(row: &SqliteRow) -> ChunkRecord {
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
        let embedding =
            embedding_bytes.map(|bytes| bytemuck::cast_slice::<u8, half::f16>(&bytes).to_vec());

        let metadata_json: String = row.get("metadata");
        let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        ChunkRecord {
            id: row.get("id"),
            document_id: row.get("document_id"),
            seq_index: row.get("seq_index"),
            content: row.get("content"),
            embedding,
            model_id: row.get("model_id"),
            metadata,
            created_at: row.get("created_at"),
        }
    }

    fn candidate_from_row(row: &SqliteRow, score: f32) -> CandidateChunk {
        let chunk = Self::chunk_from_row(row);
        let document = DocumentSummary {
            id: chunk.document_id,
            title: row.get("doc_title"),
            source_url: row.get("doc_source_url"),
            language: row.get("doc_language"),
            created_at: row.get("doc_created_at"),
        };
        CandidateChunk {
            chunk,
            document,
            score,
        }
    }

    /// Rows in the eligible chunk set: indexed parent, embedding present,
    /// language matching or unset.
    async fn eligible_rows(
        &self,
        model_id: Option<&str>,
        language: Option<&str>,
    ) -> Result<Vec<SqliteRow>> {
        let query = format!(
            "SELECT {CANDIDATE_COLUMNS}
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE d.status = 'indexed'
               AND c.embedding IS NOT NULL
               AND (?1 IS NULL OR c.model_id = ?1)
               AND (?2 IS NULL OR d.language IS NULL OR d.language = ?2)"
        );

        let rows = sqlx::query(&query)
            .bind(model_id)
            .bind(language)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

fn sort_and_truncate(mut candidates: Vec<CandidateChunk>, limit: usize) -> Vec<CandidateChunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.document.created_at.cmp(&a.document.created_at))
            .then(a.chunk.seq_index.cmp(&b.chunk.seq_index))
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    candidates.truncate(limit);
    candidates
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_or_get_document(&self, draft: DocumentDraft) -> Result<(Document, bool)> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (title, source_url, content_hash, language, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(&draft.title)
        .bind(draft.source_url.as_deref())
        .bind(&draft.content_hash[..])
        .bind(draft.language.as_deref())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        let document = self
            .get_document_by_hash(&draft.content_hash)
            .await?
            .context("document missing directly after insert")?;
        Ok((document, created))
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn get_document_by_hash(&self, hash: &ContentHash) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE content_hash = ?1")
            .bind(&hash[..])
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn advance_status(
        &self,
        id: DocumentId,
        from: DocumentStatus,
        to: DocumentStatus,
    ) -> Result<Document> {
        if !from.can_advance_to(to) {
            bail!("illegal document status transition: {from} -> {to}");
        }

        let now = chrono::Utc::now().timestamp();
        let result =
            sqlx::query("UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4")
                .bind(to.as_str())
                .bind(now)
                .bind(id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            bail!("document {id} is not in status {from}");
        }

        self.get_document(id)
            .await?
            .with_context(|| format!("document {id} missing after status update"))
    }

    async fn upsert_chunks(&self, document_id: DocumentId, chunks: Vec<NewChunk>) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let count = chunks.len();
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let embedding_bytes = chunk
                .embedding
                .as_ref()
                .map(|e| bytemuck::cast_slice::<half::f16, u8>(e));
            let metadata_json = serde_json::to_string(&chunk.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO chunks (document_id, seq_index, content, embedding, model_id, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(document_id, seq_index) DO UPDATE SET
                    content = excluded.content,
                    embedding = excluded.embedding,
                    model_id = excluded.model_id,
                    metadata = excluded.metadata
                "#,
            )
            .bind(document_id)
            .bind(chunk.seq_index)
            .bind(&chunk.content)
            .bind(embedding_bytes)
            .bind(chunk.model_id.as_deref())
            .bind(metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(count)
    }

    async fn get_chunks(&self, document_id: DocumentId) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY seq_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::chunk_from_row).collect())
    }

    async fn delete_chunks(&self, document_id: DocumentId) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn dense_candidates(
        &self,
        query: &[half::f16],
        model_id: &str,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateChunk>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = self.eligible_rows(Some(model_id), language).await?;

        let candidates = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                let embedding = bytemuck::cast_slice::<u8, half::f16>(&embedding_bytes);
                if embedding.len() != query.len() {
                    return None;
                }
                let score = cosine_similarity(query, embedding);
                Some(Self::candidate_from_row(row, score))
            })
            .collect();

        Ok(sort_and_truncate(candidates, limit))
    }

    async fn lexical_candidates(
        &self,
        query: &str,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateChunk>> {
        let query_trigrams = lexical::trigrams(query);
        if query_trigrams.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = self.eligible_rows(None, language).await?;

        let candidates = rows
            .iter()
            .filter_map(|row| {
                let content: String = row.get("content");
                let score = lexical::similarity_to(&query_trigrams, &content);
                if score > 0.0 {
                    Some(Self::candidate_from_row(row, score))
                } else {
                    None
                }
            })
            .collect();

        Ok(sort_and_truncate(candidates, limit))
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::document_from_row).collect()
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let indexed_documents: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'indexed'")
                .fetch_one(&self.pool)
                .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embedded_chunks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStats {
            documents: documents as usize,
            indexed_documents: indexed_documents as usize,
            chunks: chunks as usize,
            embedded_chunks: embedded_chunks as usize,
        })
    }
}

/// Cosine similarity between two f16 vectors of equal length.
fn cosine_similarity(a: &[half::f16], b: &[half::f16]) -> f32 {
    let dot_product: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f32::from(*x) * f32::from(*y))
        .sum();

    let norm_a: f32 = a.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
