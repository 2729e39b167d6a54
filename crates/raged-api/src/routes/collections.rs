//! Collection introspection route

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use raged_data::models::CollectionStats;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/collections", get(collections_handler))
}

#[derive(Serialize)]
struct CollectionsResponse {
    ok: bool,
    collections: Vec<CollectionStats>,
}

/// Per-collection document and chunk counts
async fn collections_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<CollectionsResponse>> {
    let collections = state.repository.collection_stats().await?;
    Ok(Json(CollectionsResponse {
        ok: true,
        collections,
    }))
}
