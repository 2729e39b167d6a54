//! Worker-facing task protocol routes
//!
//! The claim/result/fail/recover endpoints are the server half of the
//! enrichment worker protocol. They sit under `/internal` and share the
//! bearer token with the public surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use raged_data::models::TaskResult;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/internal/tasks/claim", post(claim_handler))
        .route("/internal/tasks/{id}/result", post(result_handler))
        .route("/internal/tasks/{id}/fail", post(fail_handler))
        .route("/internal/tasks/recover-stale", post(recover_handler))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimRequest {
    worker_id: Option<String>,
}

/// Claim the oldest eligible task; 204 when the queue is empty
async fn claim_handler(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<Response> {
    let worker_id = request
        .worker_id
        .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));
    match state.queue.claim(&worker_id).await? {
        Some(claimed) => Ok(Json(claimed).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

/// Apply a worker's result: chunk metadata, summary promotion, completion
async fn result_handler(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(result): Json<TaskResult>,
) -> ApiResult<Json<OkResponse>> {
    state.queue.submit_result(task_id, &result).await?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
struct FailRequest {
    #[serde(alias = "message")]
    error: Option<String>,
}

#[derive(Serialize)]
struct FailResponse {
    ok: bool,
    status: String,
}

/// Record a worker-reported failure; retry or dead-letter
async fn fail_handler(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<FailRequest>,
) -> ApiResult<Json<FailResponse>> {
    let message = request
        .error
        .unwrap_or_else(|| "worker reported failure".to_string());
    let status = state.queue.fail(task_id, &message).await?;
    Ok(Json(FailResponse {
        ok: true,
        status: status.to_string(),
    }))
}

#[derive(Serialize)]
struct RecoverResponse {
    ok: bool,
    recovered: u64,
}

/// Release expired leases back to pending
async fn recover_handler(State(state): State<AppState>) -> ApiResult<Json<RecoverResponse>> {
    let recovered = state.queue.recover_stale().await?;
    Ok(Json(RecoverResponse {
        ok: true,
        recovered,
    }))
}
