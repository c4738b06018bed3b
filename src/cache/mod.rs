//! Entity State Cache
//!
//! The authoritative in-memory view of every monitored entity. Only the
//! monitor loop (live and catch-up events) and the reconciler mutate it.

mod filter;
mod state_cache;

pub use filter::{EntityFilter, EntityPattern};
pub use state_cache::{ApplyResult, EntityStateCache, ReconcileReport};
