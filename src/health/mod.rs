//! Health Monitor
//!
//! Per-entity state machine turning cached states into health issues:
//! `Healthy → Suspect → Unhealthy → HealingInFlight → (Healthy | Escalated)`.
//! An attempt that leaves the entity bad returns it to `Unhealthy` with a
//! retry scheduled, until it recovers or healing escalates.

mod monitor;

pub use monitor::{HealthMonitor, HealthRules, PendingRetry, SharedHealthMonitor};

/// Read access to which entities currently have an open issue.
///
/// The orchestrator consults this to drop issues whose entity recovered
/// while the issue was queued.
pub trait IssueLedger: Send + Sync {
    fn is_open(&self, entity_id: &str) -> bool;
}
