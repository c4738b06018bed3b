//! Entity state as seen by the controller and as carried on the event stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Last known state of a single controller entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// When `state` last changed value
    pub last_changed: DateTime<Utc>,
    /// When the controller last reported this entity, even with an unchanged value
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    /// Domain part of the entity id (`sensor` for `sensor.kitchen_temp`).
    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }

    /// Friendly name attribute if the controller supplied one.
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }
}

/// A single state change delivered by the event stream or replayed from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Controller-side `last_updated` of the new state
    pub timestamp: DateTime<Utc>,
}

impl StateEvent {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
            timestamp,
        }
    }
}

impl From<EntityState> for StateEvent {
    fn from(entity: EntityState) -> Self {
        Self {
            entity_id: entity.entity_id,
            state: entity.state,
            attributes: entity.attributes,
            timestamp: entity.last_updated,
        }
    }
}

/// Returns the domain prefix of an entity id, or the whole id when it has no dot.
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or(entity_id, |(domain, _)| domain)
}

/// Messages carried from the stream client to the monitor loop.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// Live event read from the subscription
    Live(StateEvent),
    /// Event replayed from history after a reconnect
    CatchUp(StateEvent),
}

impl StreamMessage {
    pub fn event(&self) -> &StateEvent {
        match self {
            Self::Live(event) | Self::CatchUp(event) => event,
        }
    }

    pub fn into_event(self) -> StateEvent {
        match self {
            Self::Live(event) | Self::CatchUp(event) => event,
        }
    }
}
