//! Retrieval pipeline: ingestion, hybrid search, answer assembly.
//!
//! ## Components
//!
//! - **[`indexer`]**: the write path: chunk, embed, persist, with
//!   idempotent per-hash ingestion
//! - **[`retriever`]**: the read path: dense + lexical candidate search
//!   fused into one deterministic ranking
//! - **[`answer`]**: grounded answer assembly with citations and a
//!   confidence score

pub mod answer;
pub mod indexer;
pub mod retriever;

pub use answer::{
    Answer, AnswerAssembler, AssemblerConfig, Citation, GenerateError, Generation,
    GenerationProvider, HttpGenerationProvider, INSUFFICIENT_INFORMATION,
    StaticGenerationProvider,
};
pub use indexer::{Indexer, IngestError, NewDocument};
pub use retriever::{RetrievalResult, Retriever, RetrieverConfig, Signal};
