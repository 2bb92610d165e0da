//! Document ingestion: chunk, embed, persist.
//!
//! The [`Indexer`] owns the write path into the retrieval store. Per
//! document it runs: content hash -> dedup check -> create `pending` row ->
//! token windows -> batched embedding -> chunk persistence in sequence
//! order -> `indexed`. Embedding failures leave the document `failed` with
//! any already-persisted chunks kept for diagnostics; the status filter in
//! the store keeps those chunks out of retrieval. Retry is caller-driven:
//! re-ingesting the same bytes while the document is `failed` re-runs the
//! pipeline in place.
//!
//! Concurrent ingests of identical bytes are serialized through a
//! process-local lock registry keyed by content hash, so the second caller
//! waits and then observes the first one's result instead of duplicating
//! chunking and embedding work.

use regqa_chunk::{ChunkError, TokenWindow, WindowChunker};
use regqa_embed::{EmbedError, EmbeddingProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::storage::{
    ContentHash, Document, DocumentDraft, DocumentStatus, DocumentStore, NewChunk,
};

/// Number of windows embedded and persisted per round trip.
const PERSIST_BATCH_SIZE: usize = 32;

/// Error raised by [`Indexer::ingest`].
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Bad chunking parameters. Caller bug, not retried.
    #[error("invalid chunking configuration: {source}")]
    InvalidConfiguration {
        #[from]
        source: ChunkError,
    },

    /// The uploaded bytes contain no indexable text.
    #[error("document contains no indexable text")]
    EmptyDocument,

    /// The embedding service failed; the document is left in `failed`
    /// status and can be retried by re-ingesting the same bytes.
    #[error("embedding service failed: {source}")]
    Embedding {
        #[from]
        source: EmbedError,
    },

    /// The retrieval store failed.
    #[error("retrieval store failed: {source}")]
    Store {
        #[from]
        source: anyhow::Error,
    },
}

/// An upload handed to the indexer. Text extraction from binary formats
/// happens upstream; `bytes` is the UTF-8 document text (form feeds mark
/// page breaks when the extractor provides them).
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub source_url: Option<String>,
    pub language: Option<String>,
    pub bytes: Vec<u8>,
}

/// Orchestrates the ingestion pipeline. Cheap to share behind an `Arc`;
/// all mutable state lives in the store and the lock registry.
pub struct Indexer {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: WindowChunker,
    ingest_locks: Mutex<HashMap<ContentHash, Arc<tokio::sync::Mutex<()>>>>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: WindowChunker,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            ingest_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest a document, idempotently per unique byte content.
    ///
    /// Returns the existing document unchanged when the hash is already
    /// known (unless it is `failed`, which triggers an in-place retry).
    pub async fn ingest(&self, upload: NewDocument) -> Result<Document, IngestError> {
        let hash: ContentHash = *blake3::hash(&upload.bytes).as_bytes();

        // Fast path outside the lock: already ingested (or in flight and
        // past document creation).
        if let Some(existing) = self.store.get_document_by_hash(&hash).await? {
            if existing.status != DocumentStatus::Failed {
                debug!(
                    document_id = existing.id,
                    status = %existing.status,
                    "ingest is a no-op: content hash already known"
                );
                return Ok(existing);
            }
        }

        let lock = self.lock_for(&hash);
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent ingest of the same bytes
        // may have completed while we waited.
        if let Some(existing) = self.store.get_document_by_hash(&hash).await? {
            match existing.status {
                DocumentStatus::Failed => {
                    info!(document_id = existing.id, "retrying failed document");
                    return self.index_document(existing, &upload.bytes, true).await;
                }
                _ => return Ok(existing),
            }
        }

        let text = String::from_utf8_lossy(&upload.bytes).into_owned();
        if regqa_chunk::count_tokens(&text) == 0 {
            return Err(IngestError::EmptyDocument);
        }

        let (document, created) = self
            .store
            .insert_or_get_document(DocumentDraft {
                title: upload.title.clone(),
                source_url: upload.source_url.clone(),
                content_hash: hash,
                language: upload.language.clone(),
            })
            .await?;
        if !created {
            // Another process slipped in between our check and the insert.
            return Ok(document);
        }

        self.index_document(document, &upload.bytes, false).await
    }

    async fn index_document(
        &self,
        document: Document,
        bytes: &[u8],
        retry: bool,
    ) -> Result<Document, IngestError> {
        let text = String::from_utf8_lossy(bytes).into_owned();

        if retry {
            let removed = self.store.delete_chunks(document.id).await?;
            debug!(
                document_id = document.id,
                removed, "cleared chunks from failed attempt"
            );
        }

        match self.chunk_embed_persist(&document, &text).await {
            Ok(chunk_count) => {
                let from = if retry {
                    DocumentStatus::Failed
                } else {
                    DocumentStatus::Pending
                };
                let document = self
                    .store
                    .advance_status(document.id, from, DocumentStatus::Indexed)
                    .await?;
                info!(
                    document_id = document.id,
                    chunks = chunk_count,
                    title = %document.title,
                    "document indexed"
                );
                Ok(document)
            }
            Err(e) => {
                warn!(
                    document_id = document.id,
                    error = %e,
                    "ingestion failed; marking document failed"
                );
                if !retry {
                    // Partial chunks are kept for diagnostics; the status
                    // filter excludes them from retrieval.
                    if let Err(status_err) = self
                        .store
                        .advance_status(document.id, DocumentStatus::Pending, DocumentStatus::Failed)
                        .await
                    {
                        warn!(
                            document_id = document.id,
                            error = %status_err,
                            "could not mark document failed"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Chunk the text, embed in batches, persist in sequence order.
    ///
    /// Each batch is persisted before the next is embedded, so chunk rows
    /// appear (and become retrievable once the document is indexed) in
    /// non-decreasing sequence order.
    async fn chunk_embed_persist(
        &self,
        document: &Document,
        text: &str,
    ) -> Result<usize, IngestError> {
        let windows: Vec<TokenWindow> = self.chunker.windows(text).collect();
        if windows.is_empty() {
            return Err(IngestError::EmptyDocument);
        }
        debug!(
            document_id = document.id,
            windows = windows.len(),
            "chunked document"
        );

        let mut total = 0usize;
        for window_batch in windows.chunks(PERSIST_BATCH_SIZE) {
            let texts: Vec<String> = window_batch.iter().map(|w| w.text.clone()).collect();
            let batch = self.embedder.embed_passages(&texts).await?;

            if batch.embeddings.len() != window_batch.len() {
                return Err(IngestError::Embedding {
                    source: EmbedError::invalid_config(format!(
                        "embedding service returned {} vectors for {} passages",
                        batch.embeddings.len(),
                        window_batch.len()
                    )),
                });
            }

            let chunks: Vec<NewChunk> = window_batch
                .iter()
                .zip(batch.embeddings)
                .map(|(window, embedding)| NewChunk {
                    seq_index: window.sequence as i64,
                    content: window.text.clone(),
                    embedding: Some(embedding),
                    model_id: Some(batch.model_id.clone()),
                    metadata: serde_json::json!({
                        "page": page_of(text, window.byte_range.start),
                        "start_token": window.start_token,
                        "token_count": window.token_count,
                    }),
                })
                .collect();

            total += self.store.upsert_chunks(document.id, chunks).await?;
        }

        Ok(total)
    }

    fn lock_for(&self, hash: &ContentHash) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.ingest_locks.lock().unwrap();
        Arc::clone(locks.entry(*hash).or_default())
    }
}

// Pages are delimited by form feeds when the upstream extractor emits them;
// text without form feeds is a single page.
fn page_of(text: &str, byte_offset: usize) -> i64 {
    text[..byte_offset].matches('\u{c}').count() as i64 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_of_counts_form_feeds() {
        let text = "first page\u{c}second page\u{c}third";
        assert_eq!(page_of(text, 0), 1);
        assert_eq!(page_of(text, text.find("second").unwrap()), 2);
        assert_eq!(page_of(text, text.find("third").unwrap()), 3);
        assert_eq!(page_of("no breaks here", 5), 1);
    }
}
