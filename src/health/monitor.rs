//! Grace-period and staleness evaluation per entity

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::IssueLedger;
use crate::cache::EntityPattern;
use crate::clock::secs;
use crate::config::{HealthConfig, HealthOverride};
use crate::types::{
    EntityHealth, EntityState, HealingAction, HealingOutcome, HealthIssue, IssueType, OpenIssue,
};

/// Effective thresholds for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthRules {
    pub grace_period: Duration,
    /// `None` disables staleness detection
    pub staleness: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Tracker {
    health: EntityHealth,
    /// When the current bad condition began
    since: DateTime<Utc>,
    condition: IssueType,
    open_issue: Option<HealthIssue>,
    /// When the open issue is due for another healing attempt
    retry_at: Option<DateTime<Utc>>,
    /// Reloads that succeeded without the entity recovering
    ineffective_reloads: u32,
}

/// An open issue whose last healing attempt left the entity bad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    pub issue: HealthIssue,
    pub ineffective_reloads: u32,
}

/// Evaluates cached entity states against health rules.
#[derive(Debug)]
pub struct HealthMonitor {
    default_rules: HealthRules,
    bad_states: Vec<String>,
    overrides: Vec<(EntityPattern, HealthOverride)>,
    trackers: HashMap<String, Tracker>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            default_rules: HealthRules {
                grace_period: secs(config.grace_period_secs),
                staleness: staleness_from_secs(config.staleness_threshold_secs),
            },
            bad_states: config.bad_states.clone(),
            overrides: config
                .overrides
                .iter()
                .filter_map(|o| match EntityPattern::new(&o.pattern) {
                    Ok(pattern) => Some((pattern, o.clone())),
                    Err(e) => {
                        warn!(pattern = %o.pattern, error = %e, "Ignoring health override");
                        None
                    }
                })
                .collect(),
            trackers: HashMap::new(),
        }
    }

    /// Rules for an entity after applying the first matching override.
    pub fn rules_for(&self, entity_id: &str) -> HealthRules {
        let Some((_, o)) = self
            .overrides
            .iter()
            .find(|(pattern, _)| pattern.matches(entity_id))
        else {
            return self.default_rules;
        };
        HealthRules {
            grace_period: o
                .grace_period_secs
                .map_or(self.default_rules.grace_period, secs),
            staleness: o
                .staleness_threshold_secs
                .map_or(self.default_rules.staleness, staleness_from_secs),
        }
    }

    fn classify(&self, entity: &EntityState, rules: HealthRules, now: DateTime<Utc>) -> Option<(IssueType, DateTime<Utc>)> {
        if self.bad_states.iter().any(|s| s == &entity.state) {
            let kind = if entity.state == "unknown" {
                IssueType::Unknown
            } else {
                IssueType::Unavailable
            };
            return Some((kind, entity.last_changed));
        }
        let staleness = rules.staleness?;
        let stale_at = entity.last_updated + staleness;
        (now > stale_at).then_some((IssueType::Stale, stale_at))
    }

    /// Evaluate one entity. Returns an issue when the entity crosses into
    /// `Unhealthy` or recovers from an open issue.
    pub fn observe(&mut self, entity: &EntityState, now: DateTime<Utc>) -> Option<HealthIssue> {
        let rules = self.rules_for(&entity.entity_id);
        let condition = self.classify(entity, rules, now);

        let Some((kind, since)) = condition else {
            let tracker = self.trackers.remove(&entity.entity_id)?;
            let open = tracker.open_issue?;
            info!(entity_id = %entity.entity_id, was = %tracker.health, "Entity recovered");
            return Some(HealthIssue {
                entity_id: entity.entity_id.clone(),
                issue_type: IssueType::Recovered,
                detected_at: now,
                first_observed_at: open.first_observed_at,
            });
        };

        let tracker = self
            .trackers
            .entry(entity.entity_id.clone())
            .or_insert_with(|| Tracker {
                health: EntityHealth::Suspect,
                since,
                condition: kind,
                open_issue: None,
                retry_at: None,
                ineffective_reloads: 0,
            });

        if tracker.health.has_open_issue() {
            return None;
        }
        // Condition type may change while suspect (unavailable → unknown);
        // the bad period is continuous, so keep the earliest start.
        tracker.since = tracker.since.min(since);
        tracker.condition = kind;

        if now - tracker.since < rules.grace_period {
            debug!(entity_id = %entity.entity_id, condition = %kind, "Entity suspect, within grace period");
            return None;
        }

        let issue = HealthIssue {
            entity_id: entity.entity_id.clone(),
            issue_type: tracker.condition,
            detected_at: now,
            first_observed_at: tracker.since,
        };
        tracker.health = EntityHealth::Unhealthy;
        tracker.open_issue = Some(issue.clone());
        info!(
            entity_id = %entity.entity_id,
            condition = %issue.issue_type,
            since = %issue.first_observed_at,
            "Entity unhealthy"
        );
        Some(issue)
    }

    /// Periodic pass over every cached entity so staleness and grace expiry
    /// are detected without new events.
    pub fn evaluate_all(&mut self, entities: &[EntityState], now: DateTime<Utc>) -> Vec<HealthIssue> {
        entities
            .iter()
            .filter_map(|entity| self.observe(entity, now))
            .collect()
    }

    /// Healing has started for the entity's open issue.
    pub fn mark_healing(&mut self, entity_id: &str) {
        if let Some(t) = self.trackers.get_mut(entity_id) {
            if t.health.has_open_issue() {
                t.health = EntityHealth::HealingInFlight;
            }
        }
    }

    /// Healing finished. Ignored when the entity already recovered so a late
    /// outcome never re-opens an issue.
    ///
    /// An escalation is terminal until recovery. Any other executed attempt
    /// leaves the issue open and schedules another: a failed reload on the
    /// next tick, a reload that succeeded once `settle` has passed.
    pub fn finish_healing(&mut self, outcome: &HealingOutcome, settle: Duration) {
        let Some(t) = self.trackers.get_mut(&outcome.entity_id) else {
            return;
        };
        if t.health != EntityHealth::HealingInFlight {
            return;
        }
        if outcome.escalation_reason().is_some() {
            t.health = EntityHealth::Escalated;
            t.retry_at = None;
            return;
        }

        t.health = EntityHealth::Unhealthy;
        t.retry_at = match outcome.action {
            HealingAction::Remediated { .. } if outcome.success => {
                t.ineffective_reloads += 1;
                Some(outcome.attempted_at + settle)
            }
            HealingAction::Remediated { .. } => Some(outcome.attempted_at),
            _ => None,
        };
        if let Some(at) = t.retry_at {
            debug!(entity_id = %outcome.entity_id, retry_at = %at, "Entity still unhealthy after healing");
        }
    }

    /// Take every open issue whose retry is due.
    pub fn due_retries(&mut self, now: DateTime<Utc>) -> Vec<PendingRetry> {
        let mut due: Vec<PendingRetry> = self
            .trackers
            .values_mut()
            .filter(|t| t.health == EntityHealth::Unhealthy && t.retry_at.is_some_and(|at| at <= now))
            .filter_map(|t| {
                t.retry_at = None;
                Some(PendingRetry {
                    issue: t.open_issue.clone()?,
                    ineffective_reloads: t.ineffective_reloads,
                })
            })
            .collect();
        due.sort_by(|a, b| a.issue.entity_id.cmp(&b.issue.entity_id));
        due
    }

    /// Forget an entity, closing any open issue without a recovery.
    pub fn clear(&mut self, entity_id: &str) -> bool {
        let removed = self.trackers.remove(entity_id);
        if removed.as_ref().is_some_and(|t| t.open_issue.is_some()) {
            info!(entity_id = %entity_id, "Open issue cleared for removed entity");
        }
        removed.is_some()
    }

    pub fn health_of(&self, entity_id: &str) -> EntityHealth {
        self.trackers
            .get(entity_id)
            .map_or(EntityHealth::Healthy, |t| t.health)
    }

    pub fn is_open(&self, entity_id: &str) -> bool {
        self.trackers
            .get(entity_id)
            .is_some_and(|t| t.health.has_open_issue())
    }

    /// The open issue for an entity, if any.
    pub fn open_issue(&self, entity_id: &str) -> Option<HealthIssue> {
        self.trackers.get(entity_id)?.open_issue.clone()
    }

    pub fn open_issues(&self) -> Vec<OpenIssue> {
        let mut issues: Vec<OpenIssue> = self
            .trackers
            .iter()
            .filter_map(|(id, t)| {
                let issue = t.open_issue.as_ref()?;
                Some(OpenIssue {
                    entity_id: id.clone(),
                    issue_type: issue.issue_type,
                    health: t.health,
                    first_observed_at: issue.first_observed_at,
                    detected_at: issue.detected_at,
                })
            })
            .collect();
        issues.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        issues
    }
}

fn staleness_from_secs(s: u64) -> Option<Duration> {
    (s > 0).then(|| secs(s))
}

/// Health monitor shared between the monitor loop, dispatcher and status view.
#[derive(Debug, Clone)]
pub struct SharedHealthMonitor(Arc<Mutex<HealthMonitor>>);

impl SharedHealthMonitor {
    pub fn new(monitor: HealthMonitor) -> Self {
        Self(Arc::new(Mutex::new(monitor)))
    }

    pub fn lock(&self) -> MutexGuard<'_, HealthMonitor> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IssueLedger for SharedHealthMonitor {
    fn is_open(&self, entity_id: &str) -> bool {
        self.lock().is_open(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::types::{EscalationReason, RemediationStrategy};

    fn t(s: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(s)
    }

    fn entity(state: &str, changed: i64, updated: i64) -> EntityState {
        EntityState {
            entity_id: "sensor.x".to_string(),
            state: state.to_string(),
            attributes: serde_json::Map::new(),
            last_changed: t(changed),
            last_updated: t(updated),
        }
    }

    fn escalated_at(at: i64) -> HealingOutcome {
        HealingOutcome::escalated("sensor.x", Some("foo"), EscalationReason::AttemptsExhausted, t(at))
    }

    fn reloaded_at(at: i64, success: bool) -> HealingOutcome {
        HealingOutcome {
            entity_id: "sensor.x".to_string(),
            integration_id: Some("foo".to_string()),
            attempted_at: t(at),
            success,
            error: (!success).then(|| "reload failed".to_string()),
            action: HealingAction::Remediated {
                strategy: RemediationStrategy::ReloadIntegration,
            },
        }
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&HealthConfig {
            grace_period_secs: 300,
            ..Default::default()
        })
    }

    #[test]
    fn test_recovery_within_grace_is_silent() {
        let mut m = monitor();
        assert!(m.observe(&entity("unavailable", 0, 0), t(0)).is_none());
        assert_eq!(m.health_of("sensor.x"), EntityHealth::Suspect);
        assert!(m.observe(&entity("unavailable", 0, 0), t(60)).is_none());
        assert!(m.observe(&entity("on", 120, 120), t(120)).is_none());
        assert_eq!(m.health_of("sensor.x"), EntityHealth::Healthy);
        assert!(m.observe(&entity("on", 120, 120), t(400)).is_none());
    }

    #[test]
    fn test_grace_expiry_emits_once_then_recovers() {
        let mut m = monitor();
        m.observe(&entity("unavailable", 0, 0), t(0));
        assert!(m.observe(&entity("unavailable", 0, 0), t(299)).is_none());

        let issue = m.observe(&entity("unavailable", 0, 0), t(300)).unwrap();
        assert_eq!(issue.issue_type, IssueType::Unavailable);
        assert_eq!(issue.first_observed_at, t(0));
        assert_eq!(issue.detected_at, t(300));

        assert!(m.observe(&entity("unavailable", 0, 0), t(330)).is_none());
        assert!(m.is_open("sensor.x"));

        let recovered = m.observe(&entity("on", 350, 350), t(350)).unwrap();
        assert_eq!(recovered.issue_type, IssueType::Recovered);
        assert_eq!(recovered.first_observed_at, t(0));
        assert!(!m.is_open("sensor.x"));
    }

    #[test]
    fn test_grace_counts_from_last_changed() {
        let mut m = monitor();
        // Unavailable for ten minutes before first observation
        let issue = m.observe(&entity("unavailable", -600, 0), t(0)).unwrap();
        assert_eq!(issue.first_observed_at, t(-600));
    }

    #[test]
    fn test_unknown_state_classified() {
        let mut m = monitor();
        let issue = m.observe(&entity("unknown", 0, 0), t(300)).unwrap();
        assert_eq!(issue.issue_type, IssueType::Unknown);
    }

    #[test]
    fn test_staleness_detection() {
        let mut m = HealthMonitor::new(&HealthConfig {
            grace_period_secs: 60,
            staleness_threshold_secs: 600,
            ..Default::default()
        });
        let e = entity("21.5", 0, 0);
        assert!(m.observe(&e, t(600)).is_none());
        assert!(m.observe(&e, t(601)).is_none());
        assert_eq!(m.health_of("sensor.x"), EntityHealth::Suspect);
        let issue = m.observe(&e, t(660)).unwrap();
        assert_eq!(issue.issue_type, IssueType::Stale);
        assert_eq!(issue.first_observed_at, t(600));
    }

    #[test]
    fn test_override_rules_apply_by_pattern() {
        let m = HealthMonitor::new(&HealthConfig {
            grace_period_secs: 300,
            overrides: vec![HealthOverride {
                pattern: "sensor.garden_*".to_string(),
                grace_period_secs: Some(900),
                staleness_threshold_secs: Some(7200),
            }],
            ..Default::default()
        });
        let rules = m.rules_for("sensor.garden_soil");
        assert_eq!(rules.grace_period, Duration::seconds(900));
        assert_eq!(rules.staleness, Some(Duration::seconds(7200)));
        assert_eq!(m.rules_for("sensor.x").grace_period, Duration::seconds(300));
        assert_eq!(m.rules_for("sensor.x").staleness, None);
    }

    #[test]
    fn test_late_healing_outcome_does_not_reopen() {
        let mut m = monitor();
        m.observe(&entity("unavailable", 0, 0), t(300));
        m.mark_healing("sensor.x");
        assert_eq!(m.health_of("sensor.x"), EntityHealth::HealingInFlight);

        m.observe(&entity("on", 310, 310), t(310));
        m.finish_healing(&escalated_at(310), Duration::zero());
        assert_eq!(m.health_of("sensor.x"), EntityHealth::Healthy);
        assert!(m.open_issues().is_empty());
    }

    #[test]
    fn test_escalated_issue_stays_open_until_recovery() {
        let mut m = monitor();
        m.observe(&entity("unavailable", 0, 0), t(300));
        m.mark_healing("sensor.x");
        m.finish_healing(&escalated_at(300), Duration::zero());
        assert_eq!(m.health_of("sensor.x"), EntityHealth::Escalated);
        assert!(m.observe(&entity("unavailable", 0, 0), t(900)).is_none());

        let issues = m.open_issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].health, EntityHealth::Escalated);

        assert!(m.observe(&entity("on", 1000, 1000), t(1000)).is_some());
    }

    #[test]
    fn test_failed_reload_schedules_retry_on_next_pass() {
        let mut m = monitor();
        let issue = m.observe(&entity("unavailable", 0, 0), t(300)).unwrap();
        m.mark_healing("sensor.x");
        assert!(m.due_retries(t(400)).is_empty());

        m.finish_healing(&reloaded_at(300, false), Duration::seconds(300));
        assert_eq!(m.health_of("sensor.x"), EntityHealth::Unhealthy);

        let due = m.due_retries(t(360));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].issue, issue);
        assert_eq!(due[0].ineffective_reloads, 0);
        // Taken once
        assert!(m.due_retries(t(420)).is_empty());
    }

    #[test]
    fn test_successful_reload_retries_after_settle() {
        let mut m = monitor();
        m.observe(&entity("unavailable", 0, 0), t(300));
        m.mark_healing("sensor.x");
        m.finish_healing(&reloaded_at(300, true), Duration::seconds(300));

        assert!(m.due_retries(t(599)).is_empty());
        let due = m.due_retries(t(600));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].ineffective_reloads, 1);
    }

    #[test]
    fn test_recovery_cancels_pending_retry() {
        let mut m = monitor();
        m.observe(&entity("unavailable", 0, 0), t(300));
        m.mark_healing("sensor.x");
        m.finish_healing(&reloaded_at(300, false), Duration::zero());

        let recovered = m.observe(&entity("on", 320, 320), t(320)).unwrap();
        assert_eq!(recovered.issue_type, IssueType::Recovered);
        assert!(m.due_retries(t(400)).is_empty());
    }

    #[test]
    fn test_clear_drops_open_issue() {
        let mut m = monitor();
        m.observe(&entity("unavailable", 0, 0), t(300));
        assert!(m.clear("sensor.x"));
        assert!(!m.is_open("sensor.x"));
        assert!(m.observe(&entity("on", 400, 400), t(400)).is_none());
    }
}
