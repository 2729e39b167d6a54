//! Raged data layer for `PostgreSQL` state management
//!
//! Owns the relational + vector schema (documents, chunks, enrichment tasks,
//! entity graph), the filter DSL compiler, the lease-based task queue, and
//! the blob-store fallback.

pub mod blob;
pub mod chunk_id;
pub mod error;
pub mod filter;
pub mod graph;
pub mod migrations;
pub mod models;
pub mod pool_manager;
pub mod repository;
pub mod task_queue;

pub use blob::{BlobStore, MemoryBlobStore, S3BlobStore};
pub use chunk_id::{ChunkId, payload_checksum};
pub use error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
pub use filter::{Filter, FilterError, FilterFragment};
pub use graph::{EntityGraphStore, EntityRecord, GraphNeighborhood, RelationshipRecord};
pub use migrations::run_migrations;
pub use models::*;
pub use pool_manager::{PoolConfig, PoolManager};
pub use repository::{DocumentRepository, PgDocumentRepository};
pub use task_queue::{EnrichmentQueue, PgEnrichmentQueue, QueueSettings};
