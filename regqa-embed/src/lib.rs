//! # regqa-embed
//!
//! Embedding clients for the regqa retrieval pipeline: a provider trait
//! shared by chunk indexing and query encoding, a local ONNX implementation
//! via FastEmbed, and a deterministic hashing implementation for tests and
//! offline development.
//!
//! ## Key points
//!
//! - **One model, both sides**: chunk vectors and query vectors must come
//!   from the same model version for cosine similarity to mean anything.
//!   Every batch is tagged with a [`model_id`](EmbeddingProvider::model_id)
//!   and the retrieval store refuses cross-model comparisons.
//! - **e5 prefixes**: the FastEmbed provider applies the `passage:` /
//!   `query:` framing the multilingual-e5 family was trained with.
//! - **Async-first**: inference runs under `spawn_blocking`; the provider
//!   handle is cheap to clone and share across requests.
//! - **Half-precision**: vectors are L2-normalized `f16`, matching the
//!   storage format of the retrieval store.
//!
//! ## Quick start
//!
//! ```no_run
//! use regqa_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> regqa_embed::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let chunks = vec!["Article 12: VAT registration thresholds...".to_string()];
//! let batch = provider.embed_passages(&chunks).await?;
//! let query = provider.embed_query("when must I register for VAT?").await?;
//!
//! assert_eq!(batch.dimension, query.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod hashing;
pub mod provider;

// Re-export main types for easy access
pub use error::{EmbedError, Result};
pub use hashing::HashingEmbeddingProvider;
pub use provider::{
    EmbedConfig, EmbeddingBatch, EmbeddingProvider, FastEmbedProvider, PASSAGE_PREFIX,
    QUERY_PREFIX,
};
