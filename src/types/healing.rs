//! Healing state, outcomes and escalations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Per-integration state
// ============================================================================

/// Budget and breaker bookkeeping for one integration.
///
/// Only mutated while the integration's exclusive section is held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationHealingState {
    /// Attempts in the current window
    pub attempt_count: u32,
    /// Failures since the last quiet-period sweep
    pub failure_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl IntegrationHealingState {
    pub fn circuit_open_at(&self, now: DateTime<Utc>) -> bool {
        self.circuit_open_until.is_some_and(|until| until > now)
    }

    pub fn circuit_state(&self, now: DateTime<Utc>) -> CircuitState {
        match self.circuit_open_until {
            Some(until) if until > now => CircuitState::Open { until },
            _ => CircuitState::Closed,
        }
    }
}

/// Breaker position reported through the status interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open { until: DateTime<Utc> },
}

// ============================================================================
// Escalations
// ============================================================================

/// Why automated remediation could not proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    Unresolvable,
    CircuitOpen,
    CooldownActive,
    AttemptsExhausted,
    MonitoringDegraded,
    AuthenticationFailed,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolvable => "integration unresolvable",
            Self::CircuitOpen => "circuit open",
            Self::CooldownActive => "cooldown active",
            Self::AttemptsExhausted => "attempts exhausted",
            Self::MonitoringDegraded => "monitoring degraded",
            Self::AuthenticationFailed => "authentication failed",
        }
    }
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible notification that automation has given up on something.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub entity_id: String,
    pub integration_id: Option<String>,
    pub reason: EscalationReason,
    pub context: BTreeMap<String, String>,
    pub raised_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(entity_id: impl Into<String>, reason: EscalationReason, raised_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            integration_id: None,
            reason,
            context: BTreeMap::new(),
            raised_at,
        }
    }

    #[must_use]
    pub fn with_integration(mut self, integration_id: impl Into<String>) -> Self {
        self.integration_id = Some(integration_id.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    /// One-line human readable summary used by notifiers.
    pub fn summary(&self) -> String {
        match &self.integration_id {
            Some(integration) => format!(
                "{} ({}): {}",
                self.entity_id, integration, self.reason
            ),
            None => format!("{}: {}", self.entity_id, self.reason),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// How remediation was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStrategy {
    /// Reload the config entry through the REST config-entry endpoint
    #[default]
    ReloadIntegration,
    /// Call the `homeassistant.reload_config_entry` service
    ReloadViaService,
}

impl std::fmt::Display for RemediationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReloadIntegration => write!(f, "reload_integration"),
            Self::ReloadViaService => write!(f, "reload_via_service"),
        }
    }
}

/// What the orchestrator did with an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealingAction {
    /// The executor was invoked
    Remediated { strategy: RemediationStrategy },
    /// All checks passed but the executor was not called
    DryRun,
    Escalated { reason: EscalationReason },
    /// The entity recovered before healing started
    AlreadyRecovered,
}

/// Result of handling one issue, forwarded to the pattern recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingOutcome {
    pub entity_id: String,
    pub integration_id: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub action: HealingAction,
}

impl HealingOutcome {
    pub fn escalated(
        entity_id: &str,
        integration_id: Option<&str>,
        reason: EscalationReason,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            integration_id: integration_id.map(str::to_string),
            attempted_at: at,
            success: false,
            error: Some(reason.to_string()),
            action: HealingAction::Escalated { reason },
        }
    }

    pub fn escalation_reason(&self) -> Option<EscalationReason> {
        match self.action {
            HealingAction::Escalated { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether the remediation executor was actually called.
    pub fn executor_called(&self) -> bool {
        matches!(self.action, HealingAction::Remediated { .. })
    }
}
