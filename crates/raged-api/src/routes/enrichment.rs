//! Enrichment introspection and control routes

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use raged_data::models::{ChunkStatusCounts, EnrichmentReport, QueueStats};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/enrichment/status/{base_id}", get(status_handler))
        .route("/enrichment/stats", get(stats_handler))
        .route("/enrichment/enqueue", post(enqueue_handler))
        .route("/enrichment/clear", post(clear_handler))
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    collection: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    ok: bool,
    #[serde(flatten)]
    report: EnrichmentReport,
}

/// Per-document enrichment state
async fn status_handler(
    State(state): State<AppState>,
    Path(base_id): Path<String>,
    Query(params): Query<StatusParams>,
) -> ApiResult<Json<StatusResponse>> {
    let report = state
        .repository
        .enrichment_report(params.collection.as_deref(), &base_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("document '{base_id}'")))?;
    Ok(Json(StatusResponse { ok: true, report }))
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    collection: Option<String>,
    q: Option<String>,
}

#[derive(Serialize)]
struct StatsResponse {
    ok: bool,
    tasks: QueueStats,
    chunks: ChunkStatusCounts,
}

/// Queue and chunk status counts
async fn stats_handler(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<StatsResponse>> {
    let tasks = state
        .queue
        .stats(params.collection.as_deref(), params.q.as_deref())
        .await?;
    let chunks = state
        .repository
        .chunk_status_counts(params.collection.as_deref(), params.q.as_deref())
        .await?;
    Ok(Json(StatsResponse { ok: true, tasks, chunks }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueRequest {
    collection: Option<String>,
    base_id: String,
}

#[derive(Serialize)]
struct EnqueueResponse {
    ok: bool,
    enqueued: usize,
}

/// Enqueue enrichment tasks for an already-ingested document
async fn enqueue_handler(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<Json<EnqueueResponse>> {
    let collection = request.collection.as_deref().unwrap_or("default");
    let enqueued = state
        .ingest
        .enqueue_for_document(collection, &request.base_id)
        .await?;
    Ok(Json(EnqueueResponse { ok: true, enqueued }))
}

#[derive(Debug, Deserialize)]
struct ClearRequest {
    collection: Option<String>,
    q: Option<String>,
}

#[derive(Serialize)]
struct ClearResponse {
    ok: bool,
    deleted: u64,
}

/// Delete queued (never completed) tasks for a collection
async fn clear_handler(
    State(state): State<AppState>,
    Json(request): Json<ClearRequest>,
) -> ApiResult<Json<ClearResponse>> {
    let collection = request.collection.as_deref().unwrap_or("default");
    let deleted = state.queue.clear(collection, request.q.as_deref()).await?;
    Ok(Json(ClearResponse { ok: true, deleted }))
}
