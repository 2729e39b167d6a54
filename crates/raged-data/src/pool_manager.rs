//! Connection pool management with read/write separation
//!
//! Ingestion and queue writes run against a small transactional pool while
//! retrieval queries get a larger concurrent pool, preventing resource
//! contention between the two workloads.

use anyhow::{Context, Result};
use raged_config::DatabaseConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Configuration for connection pools
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections for write pool
    pub write_pool_size: u32,
    /// Maximum connections for read pool
    pub read_pool_size: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Idle timeout in seconds
    pub idle_timeout: u64,
    /// Maximum lifetime in seconds
    pub max_lifetime: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            write_pool_size: 10,
            read_pool_size: 20,
            connect_timeout: 30,
            idle_timeout: 600,
            max_lifetime: 1800,
        }
    }
}

/// Manages the write and read connection pools
#[derive(Clone)]
pub struct PoolManager {
    /// Pool for write operations (ingestion, queue transitions)
    write_pool: PgPool,
    /// Pool for read operations (retrieval, introspection)
    read_pool: PgPool,
}

impl PoolManager {
    /// Create a new pool manager with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Database URL is malformed or contains invalid parameters
    /// - Database server is unreachable or refuses connections
    /// - Authentication fails due to invalid credentials
    /// - Either connection pool fails to connect within the timeout
    pub async fn new(db_config: &DatabaseConfig, config: PoolConfig) -> Result<Self> {
        let write_pool = PgPoolOptions::new()
            .max_connections(config.write_pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .max_lifetime(Duration::from_secs(config.max_lifetime))
            .connect(&db_config.url)
            .await
            .context("Failed to create write pool")?;

        let read_pool = PgPoolOptions::new()
            .max_connections(config.read_pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .max_lifetime(Duration::from_secs(config.max_lifetime))
            .connect(&db_config.url)
            .await
            .context("Failed to create read pool")?;

        Ok(Self {
            write_pool,
            read_pool,
        })
    }

    /// Create a pool manager without connecting
    ///
    /// Connections are established on first use. Useful when the database
    /// may come up after the service, and for tests that never touch it.
    ///
    /// # Errors
    ///
    /// Returns an error when the database URL cannot be parsed.
    pub fn new_lazy(db_config: &DatabaseConfig, config: &PoolConfig) -> Result<Self> {
        let write_pool = PgPoolOptions::new()
            .max_connections(config.write_pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect_lazy(&db_config.url)
            .context("Failed to create lazy write pool")?;
        let read_pool = PgPoolOptions::new()
            .max_connections(config.read_pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect_lazy(&db_config.url)
            .context("Failed to create lazy read pool")?;
        Ok(Self {
            write_pool,
            read_pool,
        })
    }

    /// Get the write pool for ingestion and queue operations
    pub const fn write_pool(&self) -> &PgPool {
        &self.write_pool
    }

    /// Get the read pool for retrieval operations
    pub const fn read_pool(&self) -> &PgPool {
        &self.read_pool
    }

    /// Close both pools
    pub async fn close(&self) {
        self.write_pool.close().await;
        self.read_pool.close().await;
    }
}
