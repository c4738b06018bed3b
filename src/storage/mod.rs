//! Pattern recording and process-level storage
//!
//! Every healing outcome and every health issue is forwarded to a
//! [`PatternRecorder`]. Recording happens after the integration's exclusive
//! section has been released and any error is logged by the caller, so a
//! broken store can never stall or fail healing.
//!
//! - [`PatternStore`]: sled-backed recorder used by the daemon
//! - [`InMemoryRecorder`]: bounded in-memory recorder for tests and
//!   `storage.record_issues = false` style minimal deployments
//! - [`ProcessLock`]: PID lock file guarding the data directory

mod lockfile;
mod patterns;

pub use lockfile::ProcessLock;
pub use patterns::PatternStore;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HealingAction, HealingOutcome, HealthIssue};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sink for healing outcomes and health issues.
///
/// Implementations must be cheap and non-blocking in the async sense; they
/// are called from healing tasks.
pub trait PatternRecorder: Send + Sync + 'static {
    fn record_outcome(&self, outcome: &HealingOutcome) -> Result<(), StorageError>;

    fn record_issue(&self, issue: &HealthIssue) -> Result<(), StorageError>;

    /// Most recent outcomes, newest first
    fn recent_outcomes(&self, limit: usize) -> Result<Vec<HealingOutcome>, StorageError>;

    /// Reliability summary per integration, sorted by integration id
    fn integration_reliability(&self) -> Result<Vec<IntegrationReliability>, StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Aggregated healing history for one integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationReliability {
    pub integration_id: String,
    /// Executor invocations
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub escalations: u64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl IntegrationReliability {
    /// Fraction of executor calls that succeeded, `None` before the first call
    pub fn success_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            Some(self.successes as f64 / self.attempts as f64)
        }
    }

    fn absorb(&mut self, outcome: &HealingOutcome) {
        match outcome.action {
            HealingAction::Remediated { .. } => {
                self.attempts += 1;
                self.last_attempt_at = self.last_attempt_at.max(Some(outcome.attempted_at));
                if outcome.success {
                    self.successes += 1;
                    self.last_success_at = self.last_success_at.max(Some(outcome.attempted_at));
                } else {
                    self.failures += 1;
                }
            }
            HealingAction::Escalated { .. } => self.escalations += 1,
            HealingAction::DryRun | HealingAction::AlreadyRecovered => {}
        }
    }
}

/// Folds outcomes into per-integration summaries. Outcomes without an
/// integration (unresolvable entities) are skipped.
pub(crate) fn summarize<'a>(
    outcomes: impl IntoIterator<Item = &'a HealingOutcome>,
) -> Vec<IntegrationReliability> {
    let mut by_integration: BTreeMap<&str, IntegrationReliability> = BTreeMap::new();
    for outcome in outcomes {
        let Some(integration) = outcome.integration_id.as_deref() else {
            continue;
        };
        by_integration
            .entry(integration)
            .or_insert_with(|| IntegrationReliability {
                integration_id: integration.to_string(),
                ..Default::default()
            })
            .absorb(outcome);
    }
    by_integration.into_values().collect()
}

/// In-memory recorder. Not durable; keeps at most `capacity` of each record.
pub struct InMemoryRecorder {
    outcomes: Mutex<VecDeque<HealingOutcome>>,
    issues: Mutex<VecDeque<HealthIssue>>,
    capacity: usize,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            issues: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// All retained outcomes in recording order
    pub fn outcomes(&self) -> Vec<HealingOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// All retained issues in recording order
    pub fn issues(&self) -> Vec<HealthIssue> {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(queue: &Mutex<VecDeque<T>>, item: T, capacity: usize) {
    let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
    if queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

impl PatternRecorder for InMemoryRecorder {
    fn record_outcome(&self, outcome: &HealingOutcome) -> Result<(), StorageError> {
        push_bounded(&self.outcomes, outcome.clone(), self.capacity);
        Ok(())
    }

    fn record_issue(&self, issue: &HealthIssue) -> Result<(), StorageError> {
        push_bounded(&self.issues, issue.clone(), self.capacity);
        Ok(())
    }

    fn recent_outcomes(&self, limit: usize) -> Result<Vec<HealingOutcome>, StorageError> {
        let outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(outcomes.iter().rev().take(limit).cloned().collect())
    }

    fn integration_reliability(&self) -> Result<Vec<IntegrationReliability>, StorageError> {
        let outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(summarize(outcomes.iter()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
