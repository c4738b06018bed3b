//! Config validation: unknown-key detection with Levenshtein suggestions
//! and timing-relationship checks.
//!
//! The raw TOML is walked before serde deserialization so that misspelled
//! keys, which serde would silently ignore under `#[serde(default)]`, are
//! reported with a "did you mean" suggestion. Warnings never break a config.

use std::collections::HashSet;

use super::SentinelConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Tables whose keys are user data rather than config fields.
const FREE_FORM_TABLES: &[&str] = &["resolver.mappings"];

/// Returns the complete set of valid dotted key paths for `SentinelConfig`.
///
/// Must be kept in step with `sentinel_config.rs`. Keys of array-of-table
/// entries (`[[health.overrides]]`) are listed under the array's path.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [controller]
        "controller",
        "controller.url",
        "controller.websocket_url",
        "controller.token",
        "controller.token_env",
        "controller.request_timeout_secs",
        // [stream]
        "stream",
        "stream.connect_timeout_secs",
        "stream.auth_timeout_secs",
        "stream.heartbeat_interval_secs",
        "stream.heartbeat_timeout_secs",
        "stream.reconnect_min_secs",
        "stream.reconnect_max_secs",
        "stream.stable_after_secs",
        "stream.channel_capacity",
        "stream.degraded_after_attempts",
        "stream.auth_failure_limit",
        "stream.catch_up",
        // [monitor]
        "monitor",
        "monitor.include_domains",
        "monitor.exclude_domains",
        "monitor.exclude_entities",
        // [health]
        "health",
        "health.grace_period_secs",
        "health.staleness_threshold_secs",
        "health.tick_interval_secs",
        "health.bad_states",
        "health.overrides",
        "health.overrides.pattern",
        "health.overrides.grace_period_secs",
        "health.overrides.staleness_threshold_secs",
        // [healing]
        "healing",
        "healing.enabled",
        "healing.strategy",
        "healing.max_attempts",
        "healing.cooldown_secs",
        "healing.circuit_breaker_threshold",
        "healing.circuit_reset_interval_secs",
        "healing.remediation_timeout_secs",
        "healing.sweep_interval_secs",
        "healing.quiet_period_secs",
        "healing.notify_timeout_secs",
        "healing.shutdown_grace_secs",
        // [reconciliation]
        "reconciliation",
        "reconciliation.interval_secs",
        "reconciliation.missing_cycles_before_removal",
        // [resolver]
        "resolver",
        "resolver.mappings",
        "resolver.controller_lookup",
        // [notifications]
        "notifications",
        "notifications.controller",
        "notifications.title",
        // [storage]
        "storage",
        "storage.data_dir",
        "storage.retention_days",
        "storage.record_issues",
        // [server]
        "server",
        "server.addr",
        // [logging]
        "logging",
        "logging.json",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1 } }` yields `["a", "a.b"]`. Tables inside arrays
/// are walked under the array's own path, so `[[a.list]] x = 1` yields
/// `["a", "a.list", "a.list.x"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if FREE_FORM_TABLES.contains(&path.as_str()) {
                continue;
            }
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        for nested in walk_toml_keys(item, &path) {
                            if !keys.contains(&nested) {
                                keys.push(nested);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Parse errors are left for serde to report.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Timing Relationships
// ============================================================================

/// Flag settings that are individually valid but work against each other.
pub fn validate_timing_relationships(config: &SentinelConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let healing = &config.healing;
    let health = &config.health;

    if healing.circuit_reset_interval_secs < healing.cooldown_secs {
        warnings.push(ValidationWarning {
            field: "healing.circuit_reset_interval_secs".to_string(),
            message: format!(
                "circuit_reset_interval_secs ({}) is shorter than cooldown_secs ({}); an open circuit will rarely be the binding limit",
                healing.circuit_reset_interval_secs, healing.cooldown_secs
            ),
            suggestion: None,
        });
    }

    if health.staleness_threshold_secs > 0 && health.staleness_threshold_secs < health.tick_interval_secs {
        warnings.push(ValidationWarning {
            field: "health.staleness_threshold_secs".to_string(),
            message: format!(
                "staleness_threshold_secs ({}) is below tick_interval_secs ({}); staleness is only detected on ticks",
                health.staleness_threshold_secs, health.tick_interval_secs
            ),
            suggestion: None,
        });
    }

    if healing.remediation_timeout_secs >= healing.cooldown_secs && healing.cooldown_secs > 0 {
        warnings.push(ValidationWarning {
            field: "healing.remediation_timeout_secs".to_string(),
            message: format!(
                "remediation_timeout_secs ({}) is not shorter than cooldown_secs ({})",
                healing.remediation_timeout_secs, healing.cooldown_secs
            ),
            suggestion: None,
        });
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================
