//! HTTP handlers over the [`Sentinel`] handle

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::{ApiError, ApiResponse};
use crate::pipeline::Sentinel;
use crate::types::ConnectionState;

/// Shared state for every handler
#[derive(Clone)]
pub struct ApiState {
    pub sentinel: Sentinel,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(sentinel: Sentinel) -> Self {
        Self {
            sentinel,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HealQuery {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub stream: ConnectionState,
    pub monitored_entities: usize,
    pub uptime_secs: i64,
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Response {
    let status = state.sentinel.get_status().await;
    ApiResponse::ok(Liveness {
        status: "ok",
        stream: status.stream.state,
        monitored_entities: status.monitored_entity_count,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.sentinel.get_status().await)
}

/// POST /api/v1/heal/:entity_id?dry_run=true
pub async fn heal(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
    Query(q): Query<HealQuery>,
) -> Result<Response, ApiError> {
    if !is_entity_id(&entity_id) {
        return Err(ApiError::InvalidEntityId(entity_id));
    }
    Ok(ApiResponse::ok(state.sentinel.trigger_heal(&entity_id, q.dry_run).await))
}

/// GET /api/v1/patterns/recent?limit=50
pub async fn recent_patterns(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> Result<Response, ApiError> {
    let limit = q.limit.unwrap_or(50).min(1000);
    Ok(ApiResponse::ok(state.sentinel.recorder().recent_outcomes(limit)?))
}

/// GET /api/v1/patterns/integrations
pub async fn integration_patterns(State(state): State<ApiState>) -> Result<Response, ApiError> {
    Ok(ApiResponse::ok(state.sentinel.recorder().integration_reliability()?))
}

fn is_entity_id(id: &str) -> bool {
    id.split_once('.')
        .is_some_and(|(domain, object)| !domain.is_empty() && !object.is_empty())
}
