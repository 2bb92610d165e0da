//! Settings for the CLI surface, optionally loaded from `regqa.toml`.

use anyhow::{Context, Result};
use regqa_chunk::ChunkerConfig;
use regqa_embed::EmbedConfig;
use serde::Deserialize;
use std::path::Path;

use crate::retrieval::{AssemblerConfig, RetrieverConfig};

/// Config file name looked up inside the base directory.
pub const CONFIG_FILE_NAME: &str = "regqa.toml";

/// Deployment settings with defaults matching the library configs.
///
/// Any subset of fields may appear in the TOML file; omitted fields keep
/// their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub window_tokens: usize,
    pub overlap_tokens: usize,
    pub top_k_dense: usize,
    pub top_k_lexical: usize,
    pub dense_weight: f32,
    pub lexical_weight: f32,
    pub context_budget_tokens: usize,
    /// Endpoint of the generation service; `ask` degrades to the
    /// insufficient-information answer when unset.
    pub generation_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let chunker = ChunkerConfig::default();
        let retriever = RetrieverConfig::default();
        let assembler = AssemblerConfig::default();
        let embed = EmbedConfig::default();

        Self {
            embedding_model: embed.model_name,
            embedding_batch_size: embed.batch_size,
            window_tokens: chunker.window_tokens,
            overlap_tokens: chunker.overlap_tokens,
            top_k_dense: retriever.top_k_dense,
            top_k_lexical: retriever.top_k_lexical,
            dense_weight: retriever.dense_weight,
            lexical_weight: retriever.lexical_weight,
            context_budget_tokens: assembler.context_budget_tokens,
            generation_url: None,
        }
    }
}

impl Settings {
    /// Load settings from `<base>/regqa.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load(base: &Path) -> Result<Self> {
        let path = base.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig::new(self.window_tokens, self.overlap_tokens)
    }

    pub fn embed_config(&self) -> EmbedConfig {
        EmbedConfig::new(self.embedding_model.clone()).with_batch_size(self.embedding_batch_size)
    }

    pub fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            top_k_dense: self.top_k_dense,
            top_k_lexical: self.top_k_lexical,
            dense_weight: self.dense_weight,
            lexical_weight: self.lexical_weight,
        }
    }

    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            context_budget_tokens: self.context_budget_tokens,
            ..AssemblerConfig::default()
        }
    }
}
