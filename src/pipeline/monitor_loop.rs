//! Event consumer and health tick
//!
//! Consumes the stream client's channel, applies each event to the cache,
//! re-evaluates the entity, and on every tick re-evaluates the whole cache so
//! grace expiry and staleness are caught without new events. Each tick also
//! re-dispatches open issues whose healing left the entity bad.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::IssueDispatcher;
use crate::cache::{EntityFilter, EntityStateCache};
use crate::clock::Clock;
use crate::health::{PendingRetry, SharedHealthMonitor};
use crate::types::{HealthIssue, StreamMessage};

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub events_applied: u64,
    pub events_ignored: u64,
    pub catch_up_applied: u64,
    pub ticks: u64,
    pub issues_raised: u64,
}

pub struct MonitorLoop {
    cache: Arc<EntityStateCache>,
    filter: EntityFilter,
    health: SharedHealthMonitor,
    dispatcher: IssueDispatcher,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    stats: MonitorStats,
}

impl MonitorLoop {
    pub fn new(
        cache: Arc<EntityStateCache>,
        filter: EntityFilter,
        health: SharedHealthMonitor,
        dispatcher: IssueDispatcher,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            cache,
            filter,
            health,
            dispatcher,
            clock,
            tick_interval,
            stats: MonitorStats::default(),
        }
    }

    /// Run until cancelled or the stream side of the channel is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<StreamMessage>, cancel: CancellationToken) -> MonitorStats {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;

        info!(tick_secs = self.tick_interval.as_secs(), "Monitor loop started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Monitor loop shutting down");
                    break;
                }
                message = rx.recv() => {
                    let Some(message) = message else {
                        info!("Event stream closed, monitor loop exiting");
                        break;
                    };
                    if let Some(issue) = self.handle_message(message) {
                        self.dispatcher.dispatch(issue);
                    }
                }
                _ = tick.tick() => {
                    let issues = self.tick();
                    self.dispatcher.dispatch_all(issues);
                    let retries = self.due_retries();
                    self.dispatcher.retry_all(retries);
                }
            }
        }

        info!(
            applied = self.stats.events_applied,
            ignored = self.stats.events_ignored,
            issues = self.stats.issues_raised,
            "Monitor loop stopped"
        );
        self.stats
    }

    /// Apply one event and evaluate the affected entity.
    pub fn handle_message(&mut self, message: StreamMessage) -> Option<HealthIssue> {
        let catch_up = matches!(message, StreamMessage::CatchUp(_));
        let event = message.into_event();
        if !self.filter.is_monitored(&event.entity_id) {
            return None;
        }

        let result = self.cache.apply(&event);
        if !result.was_applied() {
            self.stats.events_ignored += 1;
            debug!(entity_id = %event.entity_id, "Stale or duplicate event ignored");
            return None;
        }
        self.stats.events_applied += 1;
        if catch_up {
            self.stats.catch_up_applied += 1;
        }

        let entity = self.cache.snapshot(&event.entity_id)?;
        let issue = self.health.lock().observe(&entity, self.clock.now());
        if issue.is_some() {
            self.stats.issues_raised += 1;
        }
        issue
    }

    /// Evaluate every cached entity.
    pub fn tick(&mut self) -> Vec<HealthIssue> {
        self.stats.ticks += 1;
        let entities = self.cache.all();
        let issues = self.health.lock().evaluate_all(&entities, self.clock.now());
        self.stats.issues_raised += issues.len() as u64;
        issues
    }

    /// Open issues due for another healing attempt.
    pub fn due_retries(&self) -> Vec<PendingRetry> {
        self.health.lock().due_retries(self.clock.now())
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }
}
