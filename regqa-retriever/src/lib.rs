//! regqa-retriever: document retrieval and answer assembly
//!
//! This crate is the core of a retrieval-augmented question-answering
//! pipeline over regulatory documents: it ingests uploaded documents into a
//! SQLite-backed retrieval store, serves hybrid (dense + lexical) chunk
//! retrieval, and assembles grounded answers with citations and a
//! confidence score.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: the Indexer (write path), Retriever (read path),
//!   and Answer Assembler
//! - **[`storage`]**: entity types, the `DocumentStore` trait, and the
//!   SQLite implementation
//! - **[`config`]**: TOML-backed settings for the CLI surface
//!
//! ## Architecture
//!
//! ```text
//! upload -> Indexer -> WindowChunker -> EmbeddingProvider -> SqliteStore
//!                                                               |
//! query  -> Retriever -> dense + lexical search -> fusion ------+
//!              |
//!              v
//!        AnswerAssembler -> GenerationProvider -> Answer {text, citations, confidence}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use regqa_chunk::{ChunkerConfig, WindowChunker};
//! use regqa_embed::HashingEmbeddingProvider;
//! use regqa_retriever::retrieval::{Indexer, NewDocument, Retriever, RetrieverConfig};
//! use regqa_retriever::storage::sqlite_store::SqliteStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open_memory().await?);
//! let embedder = Arc::new(HashingEmbeddingProvider::default());
//! let chunker = WindowChunker::new(ChunkerConfig::default())?;
//!
//! let indexer = Indexer::new(store.clone(), embedder.clone(), chunker);
//! indexer
//!     .ingest(NewDocument {
//!         title: "Income Tax Proclamation".to_string(),
//!         source_url: None,
//!         language: Some("en".to_string()),
//!         bytes: b"Taxable income includes ...".to_vec(),
//!     })
//!     .await?;
//!
//! let retriever = Retriever::new(store, embedder, RetrieverConfig::default());
//! let ranked = retriever.retrieve("what income is taxable?", None, 5).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod retrieval;
pub mod storage;
