//! Raged API server library
//!
//! HTTP surface over the ingestion pipeline, query engine, enrichment queue
//! and entity graph. The binary in `main.rs` wires configuration through
//! [`bootstrap`] and serves the router from [`routes`].

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
