//! Healing Orchestrator
//!
//! One `tokio::sync::Mutex` per integration serializes every decision and
//! remediation call for that integration. Integrations never share a lock,
//! so a slow reload of one integration cannot delay healing of another.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::remediation::{RemediationError, RemediationExecutor};
use super::resolver::IntegrationResolver;
use crate::clock::{self, Clock};
use crate::config::HealingConfig;
use crate::health::IssueLedger;
use crate::notify::{self, NotificationSink};
use crate::storage::PatternRecorder;
use crate::types::{
    Escalation, EscalationReason, HealingAction, HealingOutcome, HealthIssue,
    IntegrationHealingState, IntegrationStatus,
};

type IntegrationSlot = Arc<tokio::sync::Mutex<IntegrationHealingState>>;

/// Budget and timing limits, derived from `[healing]`.
#[derive(Debug, Clone)]
pub struct HealingPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_reset_interval: Duration,
    pub remediation_timeout: StdDuration,
    pub quiet_period: Duration,
    pub notify_timeout: StdDuration,
}

impl From<&HealingConfig> for HealingPolicy {
    fn from(config: &HealingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            cooldown: clock::secs(config.cooldown_secs),
            circuit_breaker_threshold: config.circuit_breaker_threshold,
            circuit_reset_interval: clock::secs(config.circuit_reset_interval_secs),
            remediation_timeout: StdDuration::from_secs(config.remediation_timeout_secs),
            quiet_period: clock::secs(config.quiet_period_secs),
            notify_timeout: StdDuration::from_secs(config.notify_timeout_secs),
        }
    }
}

impl Default for HealingPolicy {
    fn default() -> Self {
        Self::from(&HealingConfig::default())
    }
}

/// Where a healing request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Raised by the Health Monitor
    Automatic,
    /// Requested through `trigger_heal`
    Manual { dry_run: bool },
}

impl Trigger {
    pub fn is_dry_run(self) -> bool {
        matches!(self, Self::Manual { dry_run: true })
    }
}

/// What one circuit-breaker sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub failures_cleared: Vec<String>,
    pub circuits_closed: Vec<String>,
    /// Integrations whose section was held, left for the next sweep
    pub skipped: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.failures_cleared.is_empty() && self.circuits_closed.is_empty()
    }
}

/// Result of the gating checks for one request
struct Decision {
    outcome: HealingOutcome,
    escalation: Option<Escalation>,
}

pub struct HealingOrchestrator {
    policy: HealingPolicy,
    resolver: Arc<dyn IntegrationResolver>,
    executor: Arc<dyn RemediationExecutor>,
    notifier: Arc<dyn NotificationSink>,
    recorder: Arc<dyn PatternRecorder>,
    ledger: Option<Arc<dyn IssueLedger>>,
    clock: Arc<dyn Clock>,
    integrations: Mutex<HashMap<String, IntegrationSlot>>,
    /// Copy of each integration's state as of its last mutation, for status reads
    published: RwLock<BTreeMap<String, IntegrationHealingState>>,
}

impl HealingOrchestrator {
    pub fn new(
        policy: HealingPolicy,
        resolver: Arc<dyn IntegrationResolver>,
        executor: Arc<dyn RemediationExecutor>,
        notifier: Arc<dyn NotificationSink>,
        recorder: Arc<dyn PatternRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            resolver,
            executor,
            notifier,
            recorder,
            ledger: None,
            clock,
            integrations: Mutex::new(HashMap::new()),
            published: RwLock::new(BTreeMap::new()),
        }
    }

    /// Drop automatic issues whose entity recovered while they were queued.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn IssueLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn policy(&self) -> &HealingPolicy {
        &self.policy
    }

    /// Handle an issue raised by the Health Monitor.
    pub async fn handle_issue(&self, issue: &HealthIssue) -> HealingOutcome {
        self.heal(&issue.entity_id, Trigger::Automatic).await
    }

    /// Give up on an entity whose reloads keep succeeding without it
    /// recovering. Integration budgets are untouched since the executor
    /// reported no failure.
    pub async fn escalate_unrecovered(&self, issue: &HealthIssue, reloads: u32) -> HealingOutcome {
        let now = self.clock.now();
        let integration_id = self.resolver.resolve(&issue.entity_id).await.ok();
        warn!(
            entity_id = %issue.entity_id,
            integration = integration_id.as_deref().unwrap_or("unknown"),
            reloads,
            "Entity still unhealthy after successful reloads"
        );

        let reason = EscalationReason::AttemptsExhausted;
        let mut escalation = Escalation::new(&issue.entity_id, reason, now)
            .with_context("reloads", reloads)
            .with_context("unhealthy_since", issue.first_observed_at.to_rfc3339());
        if let Some(id) = &integration_id {
            escalation = escalation.with_integration(id);
        }
        let outcome = HealingOutcome::escalated(&issue.entity_id, integration_id.as_deref(), reason, now);

        if let Err(e) = self.recorder.record_outcome(&outcome) {
            warn!(entity_id = %issue.entity_id, error = %e, backend = self.recorder.backend_name(), "Failed to record healing outcome");
        }
        notify::deliver(self.notifier.as_ref(), &escalation, self.policy.notify_timeout).await;
        outcome
    }

    /// Run one healing request to completion.
    ///
    /// The outcome is recorded and any escalation delivered after the
    /// integration's section has been released. Dry runs neither record nor
    /// notify.
    pub async fn heal(&self, entity_id: &str, trigger: Trigger) -> HealingOutcome {
        let Decision { outcome, escalation } = self.decide(entity_id, trigger).await;

        if trigger.is_dry_run() {
            return outcome;
        }
        if let Err(e) = self.recorder.record_outcome(&outcome) {
            warn!(entity_id, error = %e, backend = self.recorder.backend_name(), "Failed to record healing outcome");
        }
        if let Some(escalation) = &escalation {
            notify::deliver(self.notifier.as_ref(), escalation, self.policy.notify_timeout).await;
        }
        outcome
    }

    fn slot(&self, integration_id: &str) -> IntegrationSlot {
        let mut integrations = self.integrations.lock().unwrap_or_else(PoisonError::into_inner);
        integrations
            .entry(integration_id.to_string())
            .or_default()
            .clone()
    }

    fn publish(&self, integration_id: &str, state: &IntegrationHealingState) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(integration_id.to_string(), state.clone());
    }

    async fn decide(&self, entity_id: &str, trigger: Trigger) -> Decision {
        let integration_id = match self.resolver.resolve(entity_id).await {
            Ok(id) => id,
            Err(e) => {
                let now = self.clock.now();
                warn!(entity_id, error = %e, "Cannot resolve owning integration");
                let escalation = Escalation::new(entity_id, EscalationReason::Unresolvable, now)
                    .with_context("error", &e);
                return Decision {
                    outcome: HealingOutcome::escalated(entity_id, None, EscalationReason::Unresolvable, now),
                    escalation: Some(escalation),
                };
            }
        };

        let slot = self.slot(&integration_id);
        let mut guard = slot.lock().await;
        let now = self.clock.now();

        if trigger == Trigger::Automatic {
            if let Some(ledger) = &self.ledger {
                if !ledger.is_open(entity_id) {
                    debug!(entity_id, integration = %integration_id, "Entity recovered before healing started");
                    return Decision {
                        outcome: HealingOutcome {
                            entity_id: entity_id.to_string(),
                            integration_id: Some(integration_id),
                            attempted_at: now,
                            success: false,
                            error: None,
                            action: HealingAction::AlreadyRecovered,
                        },
                        escalation: None,
                    };
                }
            }
        }

        // Dry runs decide against a scratch copy so nothing is mutated.
        let mut scratch;
        let state: &mut IntegrationHealingState = if trigger.is_dry_run() {
            scratch = guard.clone();
            &mut scratch
        } else {
            &mut *guard
        };

        if let Some(reason) = self.gate(state, now) {
            let escalation = self.escalation(entity_id, &integration_id, reason, state, now);
            if !trigger.is_dry_run() {
                self.publish(&integration_id, state);
                warn!(
                    entity_id,
                    integration = %integration_id,
                    reason = %reason,
                    attempts = state.attempt_count,
                    failures = state.failure_count,
                    "Healing skipped"
                );
            }
            return Decision {
                outcome: HealingOutcome::escalated(entity_id, Some(&integration_id), reason, now),
                escalation: Some(escalation),
            };
        }

        if trigger.is_dry_run() {
            return Decision {
                outcome: HealingOutcome {
                    entity_id: entity_id.to_string(),
                    integration_id: Some(integration_id),
                    attempted_at: now,
                    success: true,
                    error: None,
                    action: HealingAction::DryRun,
                },
                escalation: None,
            };
        }

        let strategy = self.executor.strategy();
        info!(
            entity_id,
            integration = %integration_id,
            attempt = state.attempt_count + 1,
            max_attempts = self.policy.max_attempts,
            strategy = %strategy,
            "Attempting remediation"
        );
        let result = match tokio::time::timeout(
            self.policy.remediation_timeout,
            self.executor.reload(&integration_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemediationError::Timeout(self.policy.remediation_timeout.as_secs())),
        };

        state.attempt_count += 1;
        state.last_attempt_at = Some(now);
        let mut escalation = None;
        let error = match result {
            Ok(()) => {
                state.attempt_count = 0;
                info!(entity_id, integration = %integration_id, "Remediation succeeded");
                None
            }
            Err(e) => {
                state.failure_count += 1;
                state.last_failure_at = Some(now);
                warn!(
                    entity_id,
                    integration = %integration_id,
                    error = %e,
                    attempts = state.attempt_count,
                    failures = state.failure_count,
                    "Remediation failed"
                );
                if state.failure_count >= self.policy.circuit_breaker_threshold {
                    self.trip(&integration_id, state, now);
                    escalation = Some(
                        self.escalation(entity_id, &integration_id, EscalationReason::CircuitOpen, state, now)
                            .with_context("last_error", &e),
                    );
                }
                Some(e.to_string())
            }
        };
        self.publish(&integration_id, state);

        Decision {
            outcome: HealingOutcome {
                entity_id: entity_id.to_string(),
                integration_id: Some(integration_id),
                attempted_at: now,
                success: error.is_none(),
                error,
                action: HealingAction::Remediated { strategy },
            },
            escalation,
        }
    }

    /// Circuit, budget and cooldown checks. May start a new attempt window,
    /// count an exhaustion as a failure, or open the circuit.
    fn gate(&self, state: &mut IntegrationHealingState, now: DateTime<Utc>) -> Option<EscalationReason> {
        if state.circuit_open_at(now) {
            return Some(EscalationReason::CircuitOpen);
        }

        let cooldown_elapsed = state
            .last_attempt_at
            .map_or(true, |at| at + self.policy.cooldown <= now);

        if state.attempt_count >= self.policy.max_attempts {
            if cooldown_elapsed {
                state.attempt_count = 0;
            } else {
                state.failure_count += 1;
                state.last_failure_at = Some(now);
                if state.failure_count >= self.policy.circuit_breaker_threshold {
                    state.circuit_open_until = Some(now + self.policy.circuit_reset_interval);
                    state.attempt_count = 0;
                }
                return Some(EscalationReason::AttemptsExhausted);
            }
        }

        if state.attempt_count == 0 && !cooldown_elapsed {
            return Some(EscalationReason::CooldownActive);
        }
        None
    }

    fn trip(&self, integration_id: &str, state: &mut IntegrationHealingState, now: DateTime<Utc>) {
        let until = now + self.policy.circuit_reset_interval;
        state.circuit_open_until = Some(until);
        state.attempt_count = 0;
        warn!(integration = integration_id, until = %until, failures = state.failure_count, "Circuit opened");
    }

    fn escalation(
        &self,
        entity_id: &str,
        integration_id: &str,
        reason: EscalationReason,
        state: &IntegrationHealingState,
        now: DateTime<Utc>,
    ) -> Escalation {
        let mut escalation = Escalation::new(entity_id, reason, now)
            .with_integration(integration_id)
            .with_context("attempts", state.attempt_count)
            .with_context("failures", state.failure_count);
        if let Some(until) = state.circuit_open_until.filter(|until| *until > now) {
            escalation = escalation.with_context("circuit_open_until", until.to_rfc3339());
        }
        if reason == EscalationReason::CooldownActive {
            if let Some(at) = state.last_attempt_at {
                escalation = escalation.with_context("cooldown_until", (at + self.policy.cooldown).to_rfc3339());
            }
        }
        escalation
    }

    /// Clear failure counts after a quiet period and close expired circuits.
    ///
    /// Integrations whose section is currently held are skipped.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let slots: Vec<(String, IntegrationSlot)> = self
            .integrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut report = SweepReport::default();
        for (integration_id, slot) in slots {
            let Ok(mut state) = slot.try_lock() else {
                report.skipped += 1;
                continue;
            };
            let mut changed = false;

            if state.circuit_open_until.is_some_and(|until| until <= now) {
                state.circuit_open_until = None;
                report.circuits_closed.push(integration_id.clone());
                changed = true;
            }
            let quiet = state
                .last_failure_at
                .map_or(true, |at| at + self.policy.quiet_period <= now);
            if state.failure_count > 0 && quiet && !state.circuit_open_at(now) {
                state.failure_count = 0;
                report.failures_cleared.push(integration_id.clone());
                changed = true;
            }

            if changed {
                self.publish(&integration_id, &state);
            }
        }

        if !report.is_empty() {
            info!(
                circuits_closed = report.circuits_closed.len(),
                failures_cleared = report.failures_cleared.len(),
                skipped = report.skipped,
                "Circuit sweep"
            );
        }
        report
    }

    /// Per-integration view for the status interface
    pub fn integration_statuses(&self) -> BTreeMap<String, IntegrationStatus> {
        let now = self.clock.now();
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, state)| {
                (
                    id.clone(),
                    IntegrationStatus {
                        circuit: state.circuit_state(now),
                        attempt_count: state.attempt_count,
                        failure_count: state.failure_count,
                        last_attempt_at: state.last_attempt_at,
                    },
                )
            })
            .collect()
    }

    /// Current state of one integration, if it was ever touched
    pub fn integration_state(&self, integration_id: &str) -> Option<IntegrationHealingState> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(integration_id)
            .cloned()
    }
}
