//! Ingestion error types
//!
//! Per-item resolution failures (fetch, empty content) stay out of this
//! enum: they populate the report's `errors[]` without aborting the batch.
//! The variants here abort the whole request.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Batch-scope ingestion failures
#[derive(Debug, Error)]
pub enum IngestError {
    /// The embedding backend failed; retrying the batch is the caller's call
    #[error(transparent)]
    Embedding(#[from] raged_embeddings::EmbeddingError),

    /// Database failure, including vector dimension mismatches
    #[error(transparent)]
    Database(#[from] raged_data::DatabaseError),

    /// The request is structurally unusable
    #[error("Invalid ingest request: {0}")]
    InvalidRequest(String),
}
