//! Health issues raised by the monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of health condition detected for an entity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Unavailable,
    Unknown,
    Stale,
    Recovered,
}

impl IssueType {
    pub fn is_recovery(self) -> bool {
        matches!(self, Self::Recovered)
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Unknown => write!(f, "unknown"),
            Self::Stale => write!(f, "stale"),
            Self::Recovered => write!(f, "recovered"),
        }
    }
}

/// One detected problem (or its recovery) for a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub entity_id: String,
    pub issue_type: IssueType,
    pub detected_at: DateTime<Utc>,
    /// When the underlying condition began
    pub first_observed_at: DateTime<Utc>,
}

/// Per-entity health state machine position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityHealth {
    #[default]
    Healthy,
    Suspect,
    Unhealthy,
    HealingInFlight,
    Escalated,
}

impl EntityHealth {
    /// Whether an issue is currently open for the entity.
    pub fn has_open_issue(self) -> bool {
        matches!(self, Self::Unhealthy | Self::HealingInFlight | Self::Escalated)
    }
}

impl std::fmt::Display for EntityHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Suspect => write!(f, "Suspect"),
            Self::Unhealthy => write!(f, "Unhealthy"),
            Self::HealingInFlight => write!(f, "Healing"),
            Self::Escalated => write!(f, "Escalated"),
        }
    }
}
