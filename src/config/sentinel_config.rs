//! Sentinel configuration structures
//!
//! All sections are `#[serde(default)]` so a partial TOML file only needs
//! the keys the operator wants to change. Each section implements `Default`
//! with the values from [`super::defaults`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use super::validation::{self, ValidationWarning};
use crate::types::RemediationStrategy;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "HASS_SENTINEL_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sentinel.toml";

/// Complete configuration for one sentinel process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub controller: ControllerConfig,
    pub stream: StreamConfig,
    pub monitor: MonitorConfig,
    pub health: HealthConfig,
    pub healing: HealingConfig,
    pub reconciliation: ReconciliationConfig,
    pub resolver: ResolverConfig,
    pub notifications: NotificationConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl SentinelConfig {
    /// Locate and load configuration using the standard search order:
    /// 1. `explicit` (the `--config` flag)
    /// 2. `$HASS_SENTINEL_CONFIG`
    /// 3. `./sentinel.toml`
    /// 4. Built-in defaults
    ///
    /// Nothing is logged here because logging is configured from the result.
    /// A file that is named explicitly or through the environment must load.
    pub fn resolve(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
        if let Some(path) = named {
            let (config, warnings) = Self::load_from_file_with_warnings(&path)?;
            return Ok(LoadedConfig { config, warnings, source: Some(path) });
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let (config, warnings) = Self::load_from_file_with_warnings(&local)?;
            return Ok(LoadedConfig { config, warnings, source: Some(local) });
        }

        Ok(LoadedConfig {
            config: Self::default(),
            warnings: Vec::new(),
            source: None,
        })
    }

    /// Load from a specific TOML file path, logging warnings.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let (config, warnings) = Self::load_from_file_with_warnings(path)?;
        for w in &warnings {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Load from a file and hand back the non-fatal warnings instead of logging them.
    pub fn load_from_file_with_warnings(
        path: &Path,
    ) -> Result<(Self, Vec<ValidationWarning>), ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents, path)
    }

    /// Parse TOML text. `origin` is only used in error messages.
    pub fn parse(
        contents: &str,
        origin: &Path,
    ) -> Result<(Self, Vec<ValidationWarning>), ConfigError> {
        let mut warnings = validation::validate_unknown_keys(contents);

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(origin.to_path_buf(), e))?;
        warnings.extend(config.validate()?);
        Ok((config, warnings))
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Validate that configuration values are usable.
    ///
    /// Impossible values are collected into a single `ConfigError::Validation`;
    /// suspicious but workable values are returned as warnings.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>, ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let c = &self.controller;
        if !(c.url.starts_with("http://") || c.url.starts_with("https://")) {
            errors.push(format!(
                "controller.url = '{}' must start with http:// or https://",
                c.url
            ));
        }
        if let Some(ws) = &c.websocket_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                errors.push(format!(
                    "controller.websocket_url = '{ws}' must start with ws:// or wss://"
                ));
            }
        }
        if c.request_timeout_secs == 0 {
            errors.push("controller.request_timeout_secs must be > 0".to_string());
        }

        let s = &self.stream;
        if s.reconnect_min_secs == 0 {
            errors.push("stream.reconnect_min_secs must be > 0".to_string());
        }
        if s.reconnect_min_secs > s.reconnect_max_secs {
            errors.push(format!(
                "stream.reconnect_min_secs ({}) must be <= reconnect_max_secs ({})",
                s.reconnect_min_secs, s.reconnect_max_secs
            ));
        }
        if s.heartbeat_interval_secs == 0 {
            errors.push("stream.heartbeat_interval_secs must be > 0".to_string());
        }
        if s.heartbeat_timeout_secs <= s.heartbeat_interval_secs {
            errors.push(format!(
                "stream.heartbeat_timeout_secs ({}) must be > heartbeat_interval_secs ({})",
                s.heartbeat_timeout_secs, s.heartbeat_interval_secs
            ));
        }
        if s.auth_timeout_secs == 0 || s.connect_timeout_secs == 0 {
            errors.push("stream.connect_timeout_secs and stream.auth_timeout_secs must be > 0".to_string());
        }
        if s.channel_capacity == 0 {
            errors.push("stream.channel_capacity must be > 0".to_string());
        }

        let h = &self.health;
        if h.grace_period_secs == 0 {
            errors.push("health.grace_period_secs must be > 0".to_string());
        }
        if h.tick_interval_secs == 0 {
            errors.push("health.tick_interval_secs must be > 0".to_string());
        }
        if h.bad_states.is_empty() {
            errors.push("health.bad_states must list at least one state".to_string());
        }
        for (i, o) in h.overrides.iter().enumerate() {
            if o.pattern.trim().is_empty() {
                errors.push(format!("health.overrides[{i}].pattern must not be empty"));
            }
            if o.grace_period_secs == Some(0) {
                errors.push(format!("health.overrides[{i}].grace_period_secs must be > 0"));
            }
        }

        let hl = &self.healing;
        if hl.max_attempts == 0 {
            errors.push("healing.max_attempts must be > 0".to_string());
        }
        if hl.circuit_breaker_threshold == 0 {
            errors.push("healing.circuit_breaker_threshold must be > 0".to_string());
        }
        if hl.remediation_timeout_secs == 0 {
            errors.push("healing.remediation_timeout_secs must be > 0".to_string());
        }
        if hl.sweep_interval_secs == 0 {
            errors.push("healing.sweep_interval_secs must be > 0".to_string());
        }

        let r = &self.reconciliation;
        if r.interval_secs == 0 {
            errors.push("reconciliation.interval_secs must be > 0".to_string());
        }
        if r.missing_cycles_before_removal == 0 {
            errors.push("reconciliation.missing_cycles_before_removal must be > 0".to_string());
        }

        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "server.addr = '{}' is not a valid socket address",
                self.server.addr
            ));
        }

        let warnings = validation::validate_timing_relationships(self);

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Result of [`SentinelConfig::resolve`].
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SentinelConfig,
    pub warnings: Vec<ValidationWarning>,
    /// File the config came from; `None` for built-in defaults
    pub source: Option<PathBuf>,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Controller
// ============================================================================

/// Connection details for the automation controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// REST base URL, e.g. `http://homeassistant.local:8123`
    pub url: String,
    /// Explicit WebSocket URL. Derived from `url` when absent.
    pub websocket_url: Option<String>,
    /// Access token. Prefer `token_env` over storing it in the file.
    pub token: Option<String>,
    /// Environment variable holding the access token
    pub token_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: defaults::CONTROLLER_URL.to_string(),
            websocket_url: None,
            token: None,
            token_env: defaults::TOKEN_ENV_VAR.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ControllerConfig {
    /// Token from the config file, else from the configured environment variable.
    pub fn access_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(&self.token_env).ok().filter(|t| !t.is_empty()))
    }

    /// WebSocket endpoint, derived from the REST URL unless set explicitly.
    pub fn websocket_endpoint(&self) -> String {
        if let Some(ws) = &self.websocket_url {
            return ws.clone();
        }
        let base = self.url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/api/websocket")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Event Stream
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub connect_timeout_secs: u64,
    pub auth_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
    /// Subscribed time after which the reconnect delay resets to the minimum
    pub stable_after_secs: u64,
    pub channel_capacity: usize,
    pub degraded_after_attempts: u32,
    pub auth_failure_limit: u32,
    /// Replay history after a reconnect
    pub catch_up: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
            auth_timeout_secs: defaults::AUTH_TIMEOUT_SECS,
            heartbeat_interval_secs: defaults::HEARTBEAT_INTERVAL_SECS,
            heartbeat_timeout_secs: defaults::HEARTBEAT_TIMEOUT_SECS,
            reconnect_min_secs: defaults::RECONNECT_MIN_DELAY_SECS,
            reconnect_max_secs: defaults::RECONNECT_MAX_DELAY_SECS,
            stable_after_secs: defaults::STABLE_CONNECTION_SECS,
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            degraded_after_attempts: defaults::DEGRADED_AFTER_ATTEMPTS,
            auth_failure_limit: defaults::AUTH_FAILURE_LIMIT,
            catch_up: true,
        }
    }
}

// ============================================================================
// Entity Filter
// ============================================================================

/// Which entities are monitored at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// When non-empty, only these domains are monitored
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    /// Entity id patterns; a trailing or leading `*` matches any suffix/prefix
    pub exclude_entities: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            include_domains: Vec::new(),
            exclude_domains: defaults::EXCLUDED_DOMAINS.iter().map(|d| (*d).to_string()).collect(),
            exclude_entities: Vec::new(),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub grace_period_secs: u64,
    /// Zero disables staleness detection
    pub staleness_threshold_secs: u64,
    pub tick_interval_secs: u64,
    pub bad_states: Vec<String>,
    pub overrides: Vec<HealthOverride>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: defaults::GRACE_PERIOD_SECS,
            staleness_threshold_secs: defaults::STALENESS_THRESHOLD_SECS,
            tick_interval_secs: defaults::HEALTH_TICK_SECS,
            bad_states: defaults::BAD_STATES.iter().map(|s| (*s).to_string()).collect(),
            overrides: Vec::new(),
        }
    }
}

/// Per-entity rule. The first override whose pattern matches wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthOverride {
    pub pattern: String,
    #[serde(default)]
    pub grace_period_secs: Option<u64>,
    #[serde(default)]
    pub staleness_threshold_secs: Option<u64>,
}

// ============================================================================
// Healing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// When false, issues are recorded but never remediated automatically
    pub enabled: bool,
    pub strategy: RemediationStrategy,
    pub max_attempts: u32,
    pub cooldown_secs: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_reset_interval_secs: u64,
    pub remediation_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub quiet_period_secs: u64,
    pub notify_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RemediationStrategy::default(),
            max_attempts: defaults::MAX_ATTEMPTS,
            cooldown_secs: defaults::COOLDOWN_SECS,
            circuit_breaker_threshold: defaults::CIRCUIT_BREAKER_THRESHOLD,
            circuit_reset_interval_secs: defaults::CIRCUIT_RESET_INTERVAL_SECS,
            remediation_timeout_secs: defaults::REMEDIATION_TIMEOUT_SECS,
            sweep_interval_secs: defaults::CIRCUIT_SWEEP_INTERVAL_SECS,
            quiet_period_secs: defaults::QUIET_PERIOD_SECS,
            notify_timeout_secs: defaults::NOTIFY_TIMEOUT_SECS,
            shutdown_grace_secs: defaults::SHUTDOWN_GRACE_SECS,
        }
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub interval_secs: u64,
    pub missing_cycles_before_removal: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::RECONCILE_INTERVAL_SECS,
            missing_cycles_before_removal: defaults::MISSING_CYCLES_BEFORE_REMOVAL,
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Entity → integration lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Static entity id → config entry id mappings, consulted first
    pub mappings: BTreeMap<String, String>,
    /// Ask the controller when no static mapping exists
    pub controller_lookup: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mappings: BTreeMap::new(),
            controller_lookup: true,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Raise a persistent notification on the controller
    pub controller: bool,
    pub title: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            controller: true,
            title: "hass-sentinel".to_string(),
        }
    }
}

// ============================================================================
// Storage / Server / Logging
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub retention_days: u32,
    /// Also record health issues, not only healing outcomes
    pub record_issues: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DATA_DIR),
            retention_days: defaults::RETENTION_DAYS,
            record_issues: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: defaults::SERVER_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable output
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<(SentinelConfig, Vec<ValidationWarning>), ConfigError> {
        SentinelConfig::parse(toml, Path::new("test.toml"))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SentinelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health.grace_period_secs, 300);
        assert_eq!(config.healing.max_attempts, 3);
        assert_eq!(config.healing.circuit_breaker_threshold, 5);
        assert_eq!(config.health.bad_states, vec!["unavailable", "unknown"]);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let (config, warnings) = parse(
            r#"
            [healing]
            max_attempts = 5
            cooldown_secs = 60
            "#,
        )
        .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config.healing.max_attempts, 5);
        assert_eq!(config.healing.cooldown_secs, 60);
        assert_eq!(config.healing.circuit_breaker_threshold, 5);
        assert_eq!(config.health.grace_period_secs, 300);
    }

    #[test]
    fn test_overrides_and_mappings_parse() {
        let (config, warnings) = parse(
            r#"
            [health]
            staleness_threshold_secs = 3600

            [[health.overrides]]
            pattern = "sensor.garden_*"
            grace_period_secs = 900

            [resolver.mappings]
            "light.porch" = "abc123"
            "#,
        )
        .unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert_eq!(config.health.overrides.len(), 1);
        assert_eq!(config.health.overrides[0].grace_period_secs, Some(900));
        assert_eq!(config.resolver.mappings.get("light.porch").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_strategy_parses_snake_case() {
        let (config, _) = parse("[healing]\nstrategy = \"reload_via_service\"\n").unwrap();
        assert_eq!(config.healing.strategy, RemediationStrategy::ReloadViaService);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = SentinelConfig::default();
        config.healing.max_attempts = 0;
        config.health.grace_period_secs = 0;
        config.stream.heartbeat_timeout_secs = config.stream.heartbeat_interval_secs;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3, "{errors:?}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_websocket_endpoint_derivation() {
        let mut c = ControllerConfig {
            url: "https://ha.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(c.websocket_endpoint(), "wss://ha.example.com/api/websocket");
        c.url = "http://10.0.0.2:8123".to_string();
        assert_eq!(c.websocket_endpoint(), "ws://10.0.0.2:8123/api/websocket");
        c.websocket_url = Some("ws://proxy/ws".to_string());
        assert_eq!(c.websocket_endpoint(), "ws://proxy/ws");
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = SentinelConfig::default();
        config.resolver.mappings.insert("switch.pump".to_string(), "entry1".to_string());
        let text = config.to_toml().unwrap();
        let (back, _) = parse(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.toml");
        let mut config = SentinelConfig::default();
        config.server.addr = "0.0.0.0:9000".to_string();
        config.save_to_file(&path).unwrap();
        let loaded = SentinelConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.addr, "0.0.0.0:9000");
    }
}
