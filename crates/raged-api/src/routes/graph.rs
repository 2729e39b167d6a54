//! Entity graph route

use axum::extract::{Path, Query, State};
use axum::{Json, Router, routing::get};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use raged_data::graph::{ExpandLimits, GraphNeighborhood};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/graph/entity/{name}", get(entity_handler))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityParams {
    depth: Option<usize>,
    max_entities: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct EntityResponse {
    ok: bool,
    #[serde(flatten)]
    neighborhood: GraphNeighborhood,
}

/// Seed entity plus bounded in/out neighbourhood
async fn entity_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<EntityParams>,
) -> ApiResult<Json<EntityResponse>> {
    let defaults = ExpandLimits::default();
    let limits = ExpandLimits {
        depth: params.depth.unwrap_or(defaults.depth).clamp(1, 5),
        max_entities: params
            .max_entities
            .unwrap_or(defaults.max_entities)
            .clamp(1, 500),
        deadline: params
            .timeout_ms
            .map_or(defaults.deadline, Duration::from_millis),
    };

    let neighborhood = state
        .graph
        .expand(&name, limits)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("entity '{name}'")))?;
    Ok(Json(EntityResponse {
        ok: true,
        neighborhood,
    }))
}
