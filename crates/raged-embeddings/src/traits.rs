//! Trait abstractions for embedding generation
//!
//! The provider trait is the unit a backend implements; the service trait is
//! what the ingestion and query pipelines consume.

use crate::EmbeddingResult;
use async_trait::async_trait;

/// Trait for embedding generation providers
///
/// Implementations wrap one remote backend. A call embeds one request's
/// worth of texts; batching and concurrency live in the service layer.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of texts, one vector per input,
    /// preserving input order
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// The dimensionality this provider is configured for
    fn dimension(&self) -> usize;

    /// The model identifier sent with each request
    fn model_name(&self) -> &str;
}

/// Service trait consumed by the pipelines
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed an ordered sequence of texts
    ///
    /// Output index i is the vector for input i. Individual request failures
    /// cancel the whole batch with an upstream error.
    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// The configured vector dimension
    fn dimension(&self) -> usize;
}
