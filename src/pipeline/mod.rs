//! Runtime wiring between the stream, cache, monitor and orchestrator
//!
//! ```text
//! EventStreamClient ──mpsc──▶ MonitorLoop ──▶ IssueDispatcher ──spawn──▶ HealingOrchestrator
//!                               │   ▲                ▲
//!                               ▼   │ tick           │
//!                        EntityStateCache ◀── Reconciler
//! ```
//!
//! [`Sentinel`] is the read/trigger handle served over HTTP.

mod coordinator;
mod dispatcher;
mod monitor_loop;

pub use coordinator::Sentinel;
pub use dispatcher::IssueDispatcher;
pub use monitor_loop::{MonitorLoop, MonitorStats};
