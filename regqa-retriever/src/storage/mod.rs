//! Storage abstraction layer for regqa-retriever
//!
//! This module defines the entity types of the retrieval store and the
//! [`DocumentStore`] trait the rest of the pipeline is written against. It
//! separates storage concerns from indexing and ranking logic, so the SQLite
//! implementation in [`sqlite_store`] can be swapped for a server-backed or
//! ANN-accelerated store without touching either.
//!
//! ## Entities
//!
//! - **Document**: one uploaded source file, deduplicated by content hash,
//!   with a forward-only lifecycle status
//! - **ChunkRecord**: one token window of a document's text plus its dense
//!   embedding and the identity of the model that produced it
//! - **CandidateChunk**: a chunk scored by a single retrieval signal,
//!   produced by the dense/lexical candidate queries
//!
//! Entities are plain value structs addressed by identifier; navigation
//! between them goes back through the store, never through an in-memory
//! object graph.

use anyhow::Result;
use async_trait::async_trait;

pub mod lexical;
pub mod sqlite_store;

/// Blake3 hash identifying unique document content (32 bytes).
pub type ContentHash = [u8; 32];

/// Database ID for a document.
pub type DocumentId = i64;

/// Database ID for a chunk.
pub type ChunkId = i64;

/// Lifecycle status of a document.
///
/// Transitions only move forward: `Pending -> Indexed`, `Pending -> Failed`,
/// and `Failed -> Indexed` (a caller-driven retry that succeeds). An
/// `Indexed` document never changes status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "indexed" => Some(DocumentStatus::Indexed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Whether `from -> to` is a legal forward transition.
    pub fn can_advance_to(self, to: DocumentStatus) -> bool {
        matches!(
            (self, to),
            (DocumentStatus::Pending, DocumentStatus::Indexed)
                | (DocumentStatus::Pending, DocumentStatus::Failed)
                | (DocumentStatus::Failed, DocumentStatus::Indexed)
        )
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source document record.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub source_url: Option<String>,
    pub content_hash: ContentHash,
    /// Short language code ("am", "en", ...); `None` means unspecified and
    /// matches every language filter.
    pub language: Option<String>,
    pub status: DocumentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields needed to create a document row. The store assigns id, status
/// (`pending`) and timestamps.
#[derive(Debug, Clone)]
pub struct DocumentDraft {
    pub title: String,
    pub source_url: Option<String>,
    pub content_hash: ContentHash,
    pub language: Option<String>,
}

/// A stored chunk: one token window of a document plus its embedding.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub document_id: DocumentId,
    /// Zero-based position within the document; unique per document.
    pub seq_index: i64,
    pub content: String,
    /// L2-normalized f16 vector; `None` until the embedding phase completes.
    pub embedding: Option<Vec<half::f16>>,
    /// Identity of the embedding model that produced `embedding`. A chunk
    /// is only comparable against queries encoded by the same model.
    pub model_id: Option<String>,
    /// Free-form metadata (page number, token offsets, ...).
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// Fields needed to persist a new chunk for a document.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub seq_index: i64,
    pub content: String,
    pub embedding: Option<Vec<half::f16>>,
    pub model_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// Parent-document fields carried with retrieval candidates, for ranking
/// tie-breaks and citation construction.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub title: String,
    pub source_url: Option<String>,
    pub language: Option<String>,
    pub created_at: i64,
}

/// A chunk scored by one retrieval signal (dense or lexical).
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub chunk: ChunkRecord,
    pub document: DocumentSummary,
    /// Raw signal score in [0, 1].
    pub score: f32,
}

/// Aggregate counts for status reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub indexed_documents: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
}

/// The retrieval store contract.
///
/// Candidate queries only ever see chunks of `indexed` documents that carry
/// an embedding; `pending` and `failed` documents (including any chunks a
/// failed ingest left behind for diagnostics) are invisible to retrieval.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document in `pending` status, or return the existing row
    /// with the same content hash. The boolean is true when a row was
    /// created by this call.
    async fn insert_or_get_document(&self, draft: DocumentDraft) -> Result<(Document, bool)>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    async fn get_document_by_hash(&self, hash: &ContentHash) -> Result<Option<Document>>;

    /// Advance a document's status. Returns the updated document, or an
    /// error if `from -> to` is not a forward transition or the row is no
    /// longer in `from` (lost race).
    async fn advance_status(
        &self,
        id: DocumentId,
        from: DocumentStatus,
        to: DocumentStatus,
    ) -> Result<Document>;

    /// Upsert chunks for a document. Conflicts on (document, seq_index)
    /// replace content, embedding, model and metadata in place.
    async fn upsert_chunks(&self, document_id: DocumentId, chunks: Vec<NewChunk>) -> Result<usize>;

    /// All chunks of a document, ordered by sequence index.
    async fn get_chunks(&self, document_id: DocumentId) -> Result<Vec<ChunkRecord>>;

    async fn delete_chunks(&self, document_id: DocumentId) -> Result<usize>;

    /// Top `limit` chunks by cosine similarity against `query`, restricted
    /// to vectors produced by `model_id` and to documents whose language
    /// matches `language` or is unset.
    async fn dense_candidates(
        &self,
        query: &[half::f16],
        model_id: &str,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateChunk>>;

    /// Top `limit` chunks by trigram similarity against `query`, with the
    /// same document filters as [`dense_candidates`](Self::dense_candidates).
    async fn lexical_candidates(
        &self,
        query: &str,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateChunk>>;

    /// All documents, newest first.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Delete a document and (by cascade) its chunks.
    async fn delete_document(&self, id: DocumentId) -> Result<bool>;

    async fn stats(&self) -> Result<StoreStats>;
}
