//! Raged API Server
//!
//! HTTP retrieval service: ingest text or URLs, query with semantic,
//! metadata or full-text strategies, and drive asynchronous enrichment
//! through the Postgres-backed task queue.

use raged_api::{bootstrap, routes};
use raged_config::ApplicationConfig;
use std::net::SocketAddr;
use tracing::info;

type MainResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> MainResult {
    // Load .env before anything reads the environment.
    raged_common::initialize_environment();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting raged API server...");

    let config = ApplicationConfig::from_env()?;
    info!(
        "Configuration loaded - API port: {}, Database: {}",
        config.api.port,
        config.database.safe_connection_string()
    );

    let state = bootstrap::build_state(&config).await?;
    let app = routes::create_router(state, config.api.body_limit_bytes);

    let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
