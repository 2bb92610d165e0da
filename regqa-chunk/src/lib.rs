pub mod window;

// Re-export the chunking surface for external use
pub use window::{
    ChunkError, ChunkerConfig, DEFAULT_OVERLAP_TOKENS, DEFAULT_WINDOW_TOKENS, TokenWindow,
    TokenWindows, WindowChunker, count_tokens,
};
