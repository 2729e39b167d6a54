//! Ingestion route

use axum::extract::State;
use axum::{Json, Router, routing::post};
use serde::Serialize;
use tracing::Instrument;

use raged_common::CorrelationId;
use raged_ingestion::{IngestReport, IngestRequest};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/ingest", post(ingest_handler))
}

#[derive(Serialize)]
struct IngestResponse {
    ok: bool,
    #[serde(flatten)]
    report: IngestReport,
}

/// Ingest a batch of items
///
/// Per-URL fetch failures land in `errors[]`; embedding and database
/// failures abort the whole request.
async fn ingest_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    let correlation_id = CorrelationId::new();
    let span = tracing::info_span!("ingest", %correlation_id, items = request.items.len());
    let report = state.ingest.ingest(request).instrument(span).await?;
    Ok(Json(IngestResponse { ok: true, report }))
}
