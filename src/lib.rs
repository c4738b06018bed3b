//! hass-sentinel: entity health monitoring and integration healing
//!
//! Watches a home-automation controller's entities over its WebSocket event
//! stream, detects entities that stay unavailable, unknown or stale past a
//! grace period, and reloads the owning integration under per-integration
//! attempt budgets, cooldowns and circuit breakers.
//!
//! ## Architecture
//!
//! - **Event Stream Client** (`acquisition`): authenticated subscription with
//!   heartbeat, reconnect backoff and gap-filling catch-up
//! - **Entity State Cache** (`cache`): authoritative in-memory snapshot
//! - **Health Monitor** (`health`): per-entity grace/staleness state machine
//! - **Healing Orchestrator** (`healing`): budgets, cooldown, circuit breaker
//! - **Background loops** (`background`): reconciliation and circuit sweep
//! - **HTTP surface** (`api`): status and manual healing

pub mod acquisition;
pub mod api;
pub mod background;
pub mod cache;
pub mod clock;
pub mod config;
pub mod controller;
pub mod health;
pub mod healing;
pub mod notify;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::SentinelConfig;

pub use types::{
    EntityState, Escalation, EscalationReason, HealingOutcome, HealthIssue, IssueType,
    SentinelStatus, StateEvent, StreamMessage,
};

pub use acquisition::EventStreamClient;
pub use cache::EntityStateCache;
pub use health::{HealthMonitor, SharedHealthMonitor};
pub use healing::{HealingOrchestrator, HealingPolicy, Trigger};
pub use pipeline::Sentinel;
pub use storage::{PatternRecorder, PatternStore};
