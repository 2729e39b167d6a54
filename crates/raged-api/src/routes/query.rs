//! Query routes
//!
//! `/query` runs the strategy dispatcher; the two companions return the
//! top-ranked document's raw bytes or concatenated text.

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::post};
use tracing::Instrument;

use raged_common::CorrelationId;
use raged_query::{QueryRequest, QueryResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/query", post(query_handler))
        .route("/query/download-first", post(download_first_handler))
        .route("/query/fulltext-first", post(fulltext_first_handler))
}

/// Run a query and return shaped results with routing info
async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let correlation_id = CorrelationId::new();
    let span = tracing::info_span!("query", %correlation_id);
    let response = state.query.query(request).instrument(span).await?;
    Ok(Json(response))
}

/// Raw bytes of the top-ranked document
async fn download_first_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Response> {
    let downloaded = state.query.download_first(request).await?;

    let content_type = downloaded
        .mime_type
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    let mut response = (StatusCode::OK, downloaded.body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    let disposition = format!("attachment; filename=\"{}\"", downloaded.base_id);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Concatenated chunk text of the top-ranked document
async fn fulltext_first_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let full = state.query.fulltext_first(request).await?;
    serde_json::to_value(&full)
        .map(|mut value| {
            if let Some(object) = value.as_object_mut() {
                object.insert("ok".to_string(), serde_json::Value::Bool(true));
            }
            Json(value)
        })
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
