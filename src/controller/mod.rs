//! Controller API access
//!
//! - `client`: REST requests (snapshot, history, reloads, services, templates)
//! - `protocol`: WebSocket message types
//! - `websocket`: tungstenite-backed event stream transport

mod client;
pub mod protocol;
mod websocket;

pub use client::{ControllerClient, ControllerError};
pub use websocket::{WsConnector, WsSession};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{EntityState, StateEvent};

/// Source of full snapshots and historical state changes.
#[async_trait]
pub trait StateSource: Send + Sync + 'static {
    /// Every entity the controller currently knows about.
    async fn fetch_states(&self) -> Result<Vec<EntityState>, ControllerError>;

    /// State changes for `entity_ids` recorded after `since`, oldest first.
    async fn history_since(
        &self,
        since: DateTime<Utc>,
        entity_ids: &[String],
    ) -> Result<Vec<StateEvent>, ControllerError>;
}
