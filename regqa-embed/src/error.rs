//! Error types for the embedding clients

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration problems, model loading failures, and runtime
/// failures during embedding generation. The embedding service is treated
/// as transient by callers: the ingest pipeline marks the affected document
/// `failed` and the query path degrades to an empty candidate set rather
/// than surfacing this error to the end user.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when provider configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// IO errors when touching model files
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
