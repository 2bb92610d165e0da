//! Query-time retrieval: dense + lexical candidate search and fusion.
//!
//! Per query the [`Retriever`] encodes the query, fans out to the store's
//! dense (cosine) and lexical (trigram) candidate searches concurrently,
//! and fuses the two lists into one ranking:
//!
//! 1. Union the candidate sets by chunk id.
//! 2. Combined score = `dense_weight * dense + lexical_weight * lexical`,
//!    with a missing signal contributing zero. Dense is the primary signal;
//!    lexical recovers exact-term matches embeddings miss, and a chunk that
//!    both signals agree on outranks an equal single-signal chunk.
//! 3. Sort by combined score desc, then parent document recency desc, then
//!    sequence index asc, then chunk id asc, fully deterministic for a
//!    fixed store state.
//! 4. Truncate to `top_k`.
//!
//! Every failure on this path (store unreachable, query embedding failed)
//! degrades to an empty result so the chat flow can answer "no information"
//! instead of erroring.

use regqa_embed::EmbeddingProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::storage::{CandidateChunk, ChunkId, ChunkRecord, DocumentStore, DocumentSummary};

/// Which search signal(s) produced a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Dense,
    Lexical,
    Both,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Dense => f.write_str("dense"),
            Signal::Lexical => f.write_str("lexical"),
            Signal::Both => f.write_str("both"),
        }
    }
}

/// One ranked chunk, with the parent-document fields needed downstream.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: ChunkRecord,
    pub document: DocumentSummary,
    /// Fused relevance score.
    pub score: f32,
    pub signal: Signal,
}

/// Tuning for candidate fan-out and fusion.
///
/// `dense_weight` should stay strictly above `lexical_weight`: cosine
/// similarity is the primary relevance signal and the trigram score exists
/// to rescue exact-term matches, not to dominate.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Candidates requested from the dense search.
    pub top_k_dense: usize,
    /// Candidates requested from the lexical search.
    pub top_k_lexical: usize,
    pub dense_weight: f32,
    pub lexical_weight: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k_dense: 20,
            top_k_lexical: 20,
            dense_weight: 0.7,
            lexical_weight: 0.3,
        }
    }
}

/// Read path of the pipeline. Shares the store and embedding provider with
/// the rest of the process; holds no per-request state.
pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Retrieve up to `top_k` ranked chunks for `query`.
    ///
    /// When `language` is given, only chunks of documents whose language
    /// matches or is unset participate. An empty return is a valid outcome,
    /// not a failure.
    pub async fn retrieve(
        &self,
        query: &str,
        language: Option<&str>,
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        if query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }

        let query_vec = match self.embedder.embed_query(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed; returning no results");
                return Vec::new();
            }
        };
        let model_id = self.embedder.model_id();

        let (dense, lexical) = tokio::join!(
            self.store
                .dense_candidates(&query_vec, &model_id, language, self.config.top_k_dense),
            self.store
                .lexical_candidates(query, language, self.config.top_k_lexical),
        );

        let dense = dense.unwrap_or_else(|e| {
            warn!(error = %e, "dense search unavailable; degrading to lexical only");
            Vec::new()
        });
        let lexical = lexical.unwrap_or_else(|e| {
            warn!(error = %e, "lexical search unavailable; degrading to dense only");
            Vec::new()
        });

        debug!(
            dense = dense.len(),
            lexical = lexical.len(),
            "fusing candidate lists"
        );
        fuse(&self.config, dense, lexical, top_k)
    }
}

/// Merge the two candidate lists into one deterministic ranking.
fn fuse(
    config: &RetrieverConfig,
    dense: Vec<CandidateChunk>,
    lexical: Vec<CandidateChunk>,
    top_k: usize,
) -> Vec<RetrievalResult> {
    struct Fused {
        candidate: CandidateChunk,
        dense: Option<f32>,
        lexical: Option<f32>,
    }

    let mut by_chunk: HashMap<ChunkId, Fused> = HashMap::new();

    for candidate in dense {
        let score = candidate.score;
        by_chunk.insert(
            candidate.chunk.id,
            Fused {
                candidate,
                dense: Some(score),
                lexical: None,
            },
        );
    }
    for candidate in lexical {
        let score = candidate.score;
        by_chunk
            .entry(candidate.chunk.id)
            .or_insert_with(|| Fused {
                candidate,
                dense: None,
                lexical: None,
            })
            .lexical = Some(score);
    }

    let mut results: Vec<RetrievalResult> = by_chunk
        .into_values()
        .map(|fused| {
            let signal = match (fused.dense, fused.lexical) {
                (Some(_), Some(_)) => Signal::Both,
                (Some(_), None) => Signal::Dense,
                _ => Signal::Lexical,
            };
            let score = config.dense_weight * fused.dense.unwrap_or(0.0)
                + config.lexical_weight * fused.lexical.unwrap_or(0.0);
            RetrievalResult {
                chunk: fused.candidate.chunk,
                document: fused.candidate.document,
                score,
                signal,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.document.created_at.cmp(&a.document.created_at))
            .then(a.chunk.seq_index.cmp(&b.chunk.seq_index))
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(top_k);
    results
}
