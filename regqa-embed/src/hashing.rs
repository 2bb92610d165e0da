//! Deterministic hashing embedder for tests and offline development.

use crate::error::Result;
use crate::provider::{EmbeddingBatch, EmbeddingProvider, normalize_to_f16};
use async_trait::async_trait;
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;

/// Embedding provider that hashes tokens into a fixed-size vector.
///
/// Each whitespace token is FNV-hashed into one signed dimension, and the
/// accumulated bag is L2-normalized. Texts that share vocabulary land near
/// each other in this space, which is all the retrieval tests need, with no
/// model download and no nondeterminism. Queries and passages are hashed
/// identically (the e5 prefixes are a model-training artifact; this space
/// has no such asymmetry).
///
/// Not a semantic embedding. Do not use in production.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f16> {
        let mut accumulator = vec![0f32; self.dimension];
        for token in text.split_whitespace() {
            let mut hasher = FnvHasher::default();
            hasher.write(token.to_lowercase().as_bytes());
            let hash = hasher.finish();

            let index = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            accumulator[index] += sign;
        }
        normalize_to_f16(accumulator)
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed_passages(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let embeddings = texts.iter().map(|t| self.embed_one(t)).collect();
        Ok(EmbeddingBatch::new(embeddings, self.model_id()))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.embed_one(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("hashing:fnv:{}", self.dimension)
    }
}
