//! Embedding generation for raged
//!
//! Exposes the [`Embedder`] provider trait, reqwest-backed HTTP providers,
//! and the batch service that fans texts out under a concurrency cap while
//! validating every returned vector's shape.

pub mod error;
pub mod providers;
pub mod service;
pub mod traits;

pub use error::{EmbeddingError, EmbeddingResult};
pub use providers::{OllamaEmbedder, OpenAiEmbedder, build_embedder};
pub use service::BatchEmbeddingService;
pub use traits::{Embedder, EmbeddingService};
