//! Application state for Axum handlers
//!
//! All services are initialised once at startup and shared across handlers;
//! nothing expensive is built per request.

use std::sync::Arc;

use raged_data::graph::EntityGraphStore;
use raged_data::repository::DocumentRepository;
use raged_data::task_queue::EnrichmentQueue;
use raged_ingestion::IngestService;
use raged_query::QueryService;

/// Application state containing all shared services
#[derive(Clone)]
pub struct AppState {
    /// Document/chunk storage
    pub repository: Arc<dyn DocumentRepository>,
    /// Ingestion pipeline
    pub ingest: Arc<IngestService>,
    /// Query engine
    pub query: Arc<QueryService>,
    /// Enrichment task queue
    pub queue: Arc<dyn EnrichmentQueue>,
    /// Entity graph read side
    pub graph: Arc<EntityGraphStore>,
    /// Bearer token; `None` disables authentication
    pub api_token: Option<String>,
}
