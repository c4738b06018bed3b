//! Hands health issues to the orchestrator, one task per issue.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::health::{PendingRetry, SharedHealthMonitor};
use crate::healing::HealingOrchestrator;
use crate::storage::PatternRecorder;
use crate::types::HealthIssue;

/// Routes issues from the monitor loop and reconciler.
///
/// Every issue is recorded. Non-recovery issues are healed on their own
/// spawned task, tracked so shutdown can wait for them. An issue stays with
/// the dispatcher until the entity recovers or healing escalates.
#[derive(Clone)]
pub struct IssueDispatcher {
    orchestrator: Arc<HealingOrchestrator>,
    health: SharedHealthMonitor,
    recorder: Arc<dyn PatternRecorder>,
    tracker: TaskTracker,
    healing_enabled: bool,
    record_issues: bool,
}

impl IssueDispatcher {
    pub fn new(
        orchestrator: Arc<HealingOrchestrator>,
        health: SharedHealthMonitor,
        recorder: Arc<dyn PatternRecorder>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            orchestrator,
            health,
            recorder,
            tracker,
            healing_enabled: true,
            record_issues: true,
        }
    }

    #[must_use]
    pub fn healing_enabled(mut self, enabled: bool) -> Self {
        self.healing_enabled = enabled;
        self
    }

    #[must_use]
    pub fn record_issues(mut self, record: bool) -> Self {
        self.record_issues = record;
        self
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn dispatch_all(&self, issues: impl IntoIterator<Item = HealthIssue>) {
        for issue in issues {
            self.dispatch(issue);
        }
    }

    pub fn dispatch(&self, issue: HealthIssue) {
        if self.record_issues {
            if let Err(e) = self.recorder.record_issue(&issue) {
                warn!(entity_id = %issue.entity_id, error = %e, "Failed to record health issue");
            }
        }

        if issue.issue_type.is_recovery() {
            info!(entity_id = %issue.entity_id, since = %issue.first_observed_at, "Issue resolved");
            return;
        }
        if !self.healing_enabled {
            info!(entity_id = %issue.entity_id, issue = %issue.issue_type, "Healing disabled, issue left open");
            return;
        }

        self.spawn_heal(issue, 0);
    }

    /// Re-dispatch open issues whose last attempt left the entity bad.
    ///
    /// Retries are not recorded again. They pass through the same
    /// orchestrator gates, so repeated failures end in an escalation. Once
    /// `max_attempts` reloads have succeeded without a recovery the entity
    /// is escalated directly.
    pub fn retry_all(&self, retries: impl IntoIterator<Item = PendingRetry>) {
        if !self.healing_enabled {
            return;
        }
        for retry in retries {
            debug!(
                entity_id = %retry.issue.entity_id,
                ineffective_reloads = retry.ineffective_reloads,
                "Retrying healing"
            );
            self.spawn_heal(retry.issue, retry.ineffective_reloads);
        }
    }

    fn spawn_heal(&self, issue: HealthIssue, ineffective_reloads: u32) {
        self.health.lock().mark_healing(&issue.entity_id);

        let orchestrator = Arc::clone(&self.orchestrator);
        let health = self.health.clone();
        self.tracker.spawn(async move {
            let policy = orchestrator.policy();
            let outcome = if ineffective_reloads >= policy.max_attempts {
                orchestrator.escalate_unrecovered(&issue, ineffective_reloads).await
            } else {
                orchestrator.handle_issue(&issue).await
            };
            health.lock().finish_healing(&outcome, policy.cooldown);
        });
    }
}
