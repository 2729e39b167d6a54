//! Query error types

use thiserror::Error;

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Failures a query can surface
#[derive(Debug, Error)]
pub enum QueryError {
    /// The strategy requires a query string and none was given
    #[error("Query text is required for this strategy")]
    EmptyQuery,

    /// The strategy name is not one of semantic/metadata/fulltext
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Filter validation failed
    #[error(transparent)]
    Filter(#[from] raged_data::FilterError),

    /// Database failure, including blob retrieval
    #[error(transparent)]
    Database(#[from] raged_data::DatabaseError),

    /// Embedding backend failure
    #[error(transparent)]
    Embedding(#[from] raged_embeddings::EmbeddingError),

    /// No matching document / raw payload for the companion endpoints
    #[error("Not found: {0}")]
    NotFound(String),
}
