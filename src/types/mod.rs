//! Shared data structures for the monitoring and healing loop
//!
//! - Entity snapshots and stream events (`entity`)
//! - Health issues raised by the monitor (`health`)
//! - Per-integration healing state, outcomes and escalations (`healing`)
//! - Read-only status views for the produced interface (`status`)

mod entity;
mod health;
mod healing;
mod status;

pub use entity::*;
pub use health::*;
pub use healing::*;
pub use status::*;
