//! Periodic full-snapshot reconciliation
//!
//! Fetches every state from the controller and corrects cache drift the
//! event stream missed. Entities that changed are re-evaluated; entities
//! removed after repeated absence have their open issues cleared.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{EntityFilter, EntityStateCache, ReconcileReport};
use crate::clock::Clock;
use crate::controller::{ControllerError, StateSource};
use crate::health::SharedHealthMonitor;
use crate::pipeline::IssueDispatcher;

pub struct Reconciler {
    source: Arc<dyn StateSource>,
    cache: Arc<EntityStateCache>,
    filter: EntityFilter,
    health: SharedHealthMonitor,
    dispatcher: IssueDispatcher,
    clock: Arc<dyn Clock>,
    interval: Duration,
    missing_limit: u32,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn StateSource>,
        cache: Arc<EntityStateCache>,
        filter: EntityFilter,
        health: SharedHealthMonitor,
        dispatcher: IssueDispatcher,
        clock: Arc<dyn Clock>,
        interval: Duration,
        missing_limit: u32,
    ) -> Self {
        Self {
            source,
            cache,
            filter,
            health,
            dispatcher,
            clock,
            interval,
            missing_limit,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!(interval_secs = self.interval.as_secs(), "Reconciler started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let pass = tokio::select! {
                () = cancel.cancelled() => break,
                pass = self.reconcile_once() => pass,
            };
            if let Err(e) = pass {
                warn!(error = %e, "Reconciliation failed, retrying next interval");
            }
        }
        info!("Reconciler stopped");
    }

    /// One reconciliation pass. Issues raised by corrected entities are dispatched.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, ControllerError> {
        // Taken before the fetch so entries updated by live events during
        // the request are never overwritten.
        let fetched_at = self.clock.now();
        let mut states = self.source.fetch_states().await?;
        states.retain(|s| self.filter.is_monitored(&s.entity_id));

        let report = self.cache.reconcile(&states, fetched_at, self.missing_limit);
        if report.is_clean() {
            debug!(entities = states.len(), missing = report.missing, "Cache in sync with controller");
            return Ok(report);
        }

        info!(
            overwritten = report.overwritten.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            missing = report.missing,
            "Reconciliation corrected cache drift"
        );

        let now = self.clock.now();
        let issues: Vec<_> = {
            let mut health = self.health.lock();
            for entity_id in &report.removed {
                health.clear(entity_id);
            }
            report
                .overwritten
                .iter()
                .chain(&report.added)
                .filter_map(|id| self.cache.snapshot(id))
                .filter_map(|entity| health.observe(&entity, now))
                .collect()
        };
        self.dispatcher.dispatch_all(issues);
        Ok(report)
    }
}
