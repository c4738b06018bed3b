//! Periodic circuit-breaker sweep

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::healing::HealingOrchestrator;

/// Runs [`HealingOrchestrator::sweep`] every `interval` until cancelled.
pub async fn run_circuit_sweep(
    orchestrator: Arc<HealingOrchestrator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    info!(interval_secs = interval.as_secs(), "Circuit sweep started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = orchestrator.sweep();
                if report.skipped > 0 {
                    debug!(skipped = report.skipped, "Busy integrations left for next sweep");
                }
            }
        }
    }
    info!("Circuit sweep stopped");
}
