//! Application bootstrap and service initialization
//!
//! Wires configuration into pools, migrations and services, and assembles
//! the shared [`AppState`]. Kept apart from `main.rs` so tests and other
//! binaries can reuse the pieces.

use std::sync::Arc;
use tracing::info;

use raged_config::ApplicationConfig;
use raged_data::blob::{BlobStore, S3BlobStore};
use raged_data::graph::EntityGraphStore;
use raged_data::repository::{DocumentRepository, PgDocumentRepository};
use raged_data::task_queue::{EnrichmentQueue, PgEnrichmentQueue, QueueSettings};
use raged_data::{PoolConfig, PoolManager, run_migrations};
use raged_embeddings::{BatchEmbeddingService, EmbeddingService, build_embedder};
use raged_fetch::UrlFetcher;
use raged_ingestion::{ChunkerConfig, IngestService, IngestServiceConfig};
use raged_query::QueryService;

use crate::state::AppState;

/// Bootstrap result type
pub type BootstrapResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Initialize database pools and run pending migrations
///
/// # Errors
///
/// Returns error if the database is unreachable or a migration fails
pub async fn setup_database(config: &ApplicationConfig) -> BootstrapResult<PoolManager> {
    info!("Initializing database connection pools...");
    let pools = PoolManager::new(&config.database, PoolConfig::default()).await?;

    if config.database.auto_migrate {
        info!("Running pending migrations...");
        run_migrations(pools.write_pool(), config.embedding.dimension).await?;
    }
    Ok(pools)
}

/// Initialize the embedding service for the configured provider
///
/// # Errors
///
/// Returns error if the provider client cannot be built
pub fn setup_embedding_service(
    config: &ApplicationConfig,
) -> BootstrapResult<Arc<dyn EmbeddingService>> {
    info!(
        provider = ?config.embedding.provider,
        model = %config.embedding.model,
        dimension = config.embedding.dimension,
        "Initializing embedding service"
    );
    let provider = build_embedder(&config.embedding)?;
    Ok(Arc::new(BatchEmbeddingService::new(
        provider,
        config.embedding.concurrency,
    )))
}

/// Initialize the optional blob store fallback
///
/// # Errors
///
/// Returns error if configured endpoint settings are rejected
pub fn setup_blob_store(
    config: &ApplicationConfig,
) -> BootstrapResult<Option<Arc<dyn BlobStore>>> {
    let Some(blob_config) = &config.blob else {
        info!("Blob store not configured; raw payloads stay inline");
        return Ok(None);
    };
    info!(endpoint = %blob_config.endpoint, bucket = %blob_config.bucket, "Initializing blob store");
    let store = S3BlobStore::new(blob_config)?;
    Ok(Some(Arc::new(store)))
}

/// Assemble the full application state
///
/// # Errors
///
/// Returns error when any collaborator fails to initialize
pub async fn build_state(config: &ApplicationConfig) -> BootstrapResult<AppState> {
    let pools = setup_database(config).await?;
    let embedder = setup_embedding_service(config)?;
    let blob = setup_blob_store(config)?;

    let repository: Arc<dyn DocumentRepository> =
        Arc::new(PgDocumentRepository::new(pools.clone()));
    let queue: Arc<dyn EnrichmentQueue> = Arc::new(PgEnrichmentQueue::new(
        pools.clone(),
        QueueSettings {
            lease_seconds: config.enrichment.lease_seconds,
            max_attempts: config.enrichment.max_attempts,
            retry_delay_seconds: config.enrichment.retry_delay_seconds,
        },
    ));
    let graph = Arc::new(EntityGraphStore::new(pools));

    let fetcher = Arc::new(UrlFetcher::new(config.fetch.clone())?);
    let ingest = Arc::new(IngestService::new(
        Arc::clone(&repository),
        Arc::clone(&embedder),
        fetcher,
        Arc::clone(&queue),
        blob.clone(),
        IngestServiceConfig {
            vector_dim: config.embedding.dimension,
            enrichment_enabled: config.enrichment.enabled,
            blob_threshold_bytes: config
                .blob
                .as_ref()
                .map_or(usize::MAX, |b| b.threshold_bytes),
            default_collection: "default".to_string(),
            chunker: ChunkerConfig::default(),
        },
    ));
    let query = Arc::new(QueryService::new(
        Arc::clone(&repository),
        embedder,
        blob,
        "default".to_string(),
    ));

    Ok(AppState {
        repository,
        ingest,
        query,
        queue,
        graph,
        api_token: config.api.api_token.clone(),
    })
}
