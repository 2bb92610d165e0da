//! Embedding provider implementations

use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};

/// Prefix applied to document chunks before encoding, per the e5 model
/// family's training convention. Queries and passages live in the same
/// vector space only when both sides use their respective prefix.
pub const PASSAGE_PREFIX: &str = "passage: ";

/// Prefix applied to query text before encoding. See [`PASSAGE_PREFIX`].
pub const QUERY_PREFIX: &str = "query: ";

/// Result of a batch embedding call
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    /// The generated embeddings, one per input text, L2-normalized
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
    /// Identity of the model that produced these vectors
    pub model_id: String,
}

impl EmbeddingBatch {
    /// Create a batch result, inferring the dimension from the first vector.
    pub fn new(embeddings: Vec<Vec<f16>>, model_id: String) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
            model_id,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can encode chunk and query text.
///
/// Chunk indexing and query encoding must go through the same provider
/// instance (same model, same version) for cosine comparisons between the
/// two to be meaningful; the [`model_id`](Self::model_id) tag is stored
/// with every chunk vector and checked again at query time.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Encode document chunks (batch processing)
    async fn embed_passages(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Encode one query
    async fn embed_query(&self, text: &str) -> Result<Vec<f16>>;

    /// Get the dimension of embeddings produced by this provider
    fn dimension(&self) -> usize;

    /// Stable identifier for this provider's model configuration
    fn model_id(&self) -> String;
}

/// Configuration for the fastembed-backed provider
#[derive(Debug, Clone, serde::Serialize)]
pub struct EmbedConfig {
    /// Model name, e.g. "multilingual-e5-large"
    pub model_name: String,
    /// Number of texts per inference batch
    pub batch_size: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            // 1024-dim multilingual model; the corpus mixes Amharic and
            // English regulatory text, so a multilingual space is required.
            model_name: "multilingual-e5-large".to_string(),
            batch_size: 16,
        }
    }
}

impl EmbedConfig {
    pub fn new<S: Into<String>>(model_name: S) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn embedding_model(&self) -> Result<EmbeddingModel> {
        match self.model_name.as_str() {
            "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
            "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
            "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            other => Err(EmbedError::invalid_config(format!(
                "Unknown embedding model: {other}"
            ))),
        }
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 0,
        }
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Loads the embedding model, reusing a process-wide cache.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!("Initializing embedding provider: {}", self.config.model_name);

        let cache_key = self.cache_key();

        let cached = {
            let cache = model_cache().lock().unwrap();
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((model, dimension)) = cached {
            tracing::debug!("Using cached model for {}", self.config.model_name);
            self.model = Some(model);
            self.dimension = dimension;
            return Ok(());
        }

        let embedding_model = self.config.embedding_model()?;
        let model_name = self.config.model_name.clone();

        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {model_name}");

                let init_options =
                    InitOptions::new(embedding_model).with_show_download_progress(true);
                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                // Probe the dimension with a throwaway embedding
                let probe = model
                    .embed(vec!["test".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);
                if dimension == 0 {
                    return Err(EmbedError::invalid_config(
                        "model produced an empty probe embedding",
                    ));
                }

                tracing::info!("Model loaded. Dimension: {dimension}");
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        {
            let mut cache = model_cache().lock().unwrap();
            cache.insert(cache_key, (Arc::clone(&model_arc), dimension));
        }

        self.model = Some(model_arc);
        self.dimension = dimension;
        Ok(())
    }

    fn cache_key(&self) -> String {
        let config_json =
            serde_json::to_string(&self.config).expect("Config should always serialize");

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());
        format!("v1:{:x}", hasher.finish())
    }

    async fn embed_raw(&self, texts: Vec<String>) -> Result<Vec<Vec<f16>>> {
        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let batch = batch.to_vec();
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Embedding batch of {} texts", batch.len());
                let mut guard = model_clone.lock().unwrap();
                guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(batch_embeddings.into_iter().map(normalize_to_f16));
        }

        Ok(all_embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_passages(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch::new(vec![], self.model_id()));
        }

        let prefixed: Vec<String> = texts
            .iter()
            .map(|t| format!("{PASSAGE_PREFIX}{t}"))
            .collect();
        let embeddings = self.embed_raw(prefixed).await?;
        Ok(EmbeddingBatch::new(embeddings, self.model_id()))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f16>> {
        let embeddings = self.embed_raw(vec![format!("{QUERY_PREFIX}{text}")]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for query"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("fastembed:{}:{}", self.config.model_name, self.dimension)
    }
}

/// Convert an f32 embedding to L2-normalized f16.
pub(crate) fn normalize_to_f16(embedding: Vec<f32>) -> Vec<f16> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        embedding
            .into_iter()
            .map(|x| f16::from_f32(x / norm))
            .collect()
    } else {
        embedding.into_iter().map(f16::from_f32).collect()
    }
}
