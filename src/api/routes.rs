//! Route table
//!
//! - `GET  /health`
//! - `GET  /api/v1/status`
//! - `POST /api/v1/heal/:entity_id?dry_run=bool`
//! - `GET  /api/v1/patterns/recent?limit=N`
//! - `GET  /api/v1/patterns/integrations`

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/heal/:entity_id", post(handlers::heal))
        .route("/patterns/recent", get(handlers::recent_patterns))
        .route("/patterns/integrations", get(handlers::integration_patterns))
        .with_state(state)
}

pub fn root_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .with_state(state)
}
