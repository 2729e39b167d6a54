//! Health check route

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Liveness probe; always unauthenticated
async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}
