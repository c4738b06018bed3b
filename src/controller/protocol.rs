//! WebSocket API message types
//!
//! The controller speaks JSON text frames tagged by `type`. After
//! `auth_required` the client must send `auth` and wait for `auth_ok` or
//! `auth_invalid`; every later command carries a client-chosen `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntityState, StateEvent};

pub const STATE_CHANGED: &str = "state_changed";

/// Messages sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { access_token: String },
    SubscribeEvents { id: u64, event_type: String },
    Ping { id: u64 },
}

impl ClientMessage {
    pub fn subscribe_state_changed(id: u64) -> Self {
        Self::SubscribeEvents {
            id,
            event_type: STATE_CHANGED.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error body attached to failed `result` messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResultError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Messages received from the controller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<ResultError>,
    },
    Event {
        id: u64,
        event: EventPayload,
    },
    Pong {
        id: u64,
    },
    #[serde(other)]
    Unknown,
}

/// Body of an `event` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub time_fired: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct StateChangedData {
    #[allow(dead_code)]
    entity_id: String,
    new_state: Option<EntityState>,
}

impl EventPayload {
    /// Converts a `state_changed` event into a stream event.
    ///
    /// Returns `None` for other event types and for entity removals
    /// (`new_state: null`).
    pub fn state_event(&self) -> Option<StateEvent> {
        if self.event_type != STATE_CHANGED {
            return None;
        }
        let data: StateChangedData = serde_json::from_value(self.data.clone()).ok()?;
        data.new_state.map(StateEvent::from)
    }
}

/// Parses one text frame. The controller may coalesce several messages
/// into a JSON array.
pub fn parse_frame(text: &str) -> Result<Vec<ServerMessage>, serde_json::Error> {
    if text.trim_start().starts_with('[') {
        serde_json::from_str(text)
    } else {
        serde_json::from_str(text).map(|m| vec![m])
    }
}
