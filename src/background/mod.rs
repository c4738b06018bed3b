//! Background loops: snapshot reconciliation and the circuit-breaker sweep
//!
//! Both run as tokio tasks alongside the monitor loop and stop on the shared
//! cancellation token.

mod circuit_sweep;
mod reconciler;

pub use circuit_sweep::run_circuit_sweep;
pub use reconciler::Reconciler;
