//! Ingestion pipeline for raged
//!
//! Resolves items (inline text or fetched URLs), classifies and chunks them,
//! embeds the chunks and upserts document + chunks idempotently, then
//! enqueues asynchronous enrichment work.

pub mod chunking;
pub mod doc_type;
pub mod error;
pub mod identity;
pub mod service;

pub use chunking::{ChunkerConfig, chunk_text};
pub use doc_type::{DocType, classify_doc_type, extract_tier1};
pub use error::{IngestError, IngestResult};
pub use identity::identity_key;
pub use service::{IngestItem, IngestReport, IngestRequest, IngestService, IngestServiceConfig};
