//! Error types for embedding generation

use thiserror::Error;

/// Result type alias for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors that can occur while generating embeddings
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The remote embedding backend failed or answered with garbage
    ///
    /// Surfaces to clients as 502.
    #[error("Upstream embedding service error: {message}")]
    Upstream { message: String },

    /// A returned vector failed shape validation
    #[error("Invalid vector at index {index}: {reason}")]
    InvalidVector { index: usize, reason: String },

    /// The provider answered with a different number of vectors than texts
    #[error("Embedding count mismatch: sent {sent} texts, got {got} vectors")]
    CountMismatch { sent: usize, got: usize },

    /// Configuration errors (bad base URL, missing credentials)
    #[error("Embedding configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream {
            message: err.to_string(),
        }
    }
}
