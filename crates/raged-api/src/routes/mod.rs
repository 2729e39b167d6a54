//! HTTP route assembly
//!
//! `/healthz` stays outside the auth layer; everything else runs behind the
//! bearer check and the request body limit.

pub mod collections;
pub mod enrichment;
pub mod graph;
pub mod health;
pub mod ingest;
pub mod query;
pub mod tasks;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;

use crate::auth::require_bearer;
use crate::state::AppState;

/// Build the full application router
pub fn create_router(state: AppState, body_limit_bytes: usize) -> Router {
    let protected = Router::new()
        .merge(ingest::routes())
        .merge(query::routes())
        .merge(collections::routes())
        .merge(enrichment::routes())
        .merge(tasks::routes())
        .merge(graph::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ))
        .layer(DefaultBodyLimit::max(body_limit_bytes));

    Router::new()
        .merge(health::routes())
        .merge(protected)
        .with_state(state)
}
