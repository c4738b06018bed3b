//! Read-only views returned by `get_status`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CircuitState, EntityHealth, IssueType};

/// Connection state of the event stream client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Counters published by the stream client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: ConnectionState,
    pub reconnections: u64,
    pub events_received: u64,
    pub catch_up_events: u64,
    pub consecutive_failures: u32,
    pub last_event_at: Option<DateTime<Utc>>,
    pub monitoring_degraded: bool,
}

/// An issue that is currently open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIssue {
    pub entity_id: String,
    pub issue_type: IssueType,
    pub health: EntityHealth,
    pub first_observed_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

/// Per-integration view of the healing budget and breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationStatus {
    pub circuit: CircuitState,
    pub attempt_count: u32,
    pub failure_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by `get_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelStatus {
    pub monitored_entity_count: usize,
    pub open_issues: Vec<OpenIssue>,
    pub per_integration_circuit_state: BTreeMap<String, IntegrationStatus>,
    pub stream: StreamStatus,
    pub generated_at: DateTime<Utc>,
}
