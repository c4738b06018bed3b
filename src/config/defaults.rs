//! System-wide default constants.
//!
//! Grouped by subsystem. Config structs fall back to these when a key is
//! absent from `sentinel.toml`.

// ============================================================================
// Controller
// ============================================================================

/// Base URL of the controller's REST API.
pub const CONTROLLER_URL: &str = "http://homeassistant.local:8123";

/// Environment variable consulted for the long-lived access token.
pub const TOKEN_ENV_VAR: &str = "HASS_TOKEN";

/// Timeout applied to every REST request (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Event Stream
// ============================================================================

pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const AUTH_TIMEOUT_SECS: u64 = 10;

/// Silence before a ping is sent (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Silence after which the connection is declared dead (seconds).
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 90;

pub const RECONNECT_MIN_DELAY_SECS: u64 = 1;
pub const RECONNECT_MAX_DELAY_SECS: u64 = 60;

/// A subscription held this long resets the reconnect delay (seconds).
pub const STABLE_CONNECTION_SECS: u64 = 60;

/// Bounded capacity of the stream → monitor channel (events).
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Consecutive failed connection attempts before "monitoring degraded" is escalated.
pub const DEGRADED_AFTER_ATTEMPTS: u32 = 20;

/// Consecutive authentication timeouts treated as a configuration failure.
pub const AUTH_FAILURE_LIMIT: u32 = 5;

// ============================================================================
// Health
// ============================================================================

/// Continuous bad-state duration before an issue is raised (seconds).
pub const GRACE_PERIOD_SECS: u64 = 300;

/// Staleness threshold (seconds). Zero disables staleness checks.
pub const STALENESS_THRESHOLD_SECS: u64 = 0;

/// Interval of the periodic health evaluation (seconds).
pub const HEALTH_TICK_SECS: u64 = 30;

/// State values treated as unhealthy.
pub const BAD_STATES: &[&str] = &["unavailable", "unknown"];

/// Domains that carry no meaningful availability signal.
pub const EXCLUDED_DOMAINS: &[&str] = &["button", "input_button", "scene", "event"];

// ============================================================================
// Healing
// ============================================================================

pub const MAX_ATTEMPTS: u32 = 3;

/// Minimum spacing between attempt windows (seconds).
pub const COOLDOWN_SECS: u64 = 300;

pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// How long an opened circuit blocks remediation (seconds).
pub const CIRCUIT_RESET_INTERVAL_SECS: u64 = 3_600;

pub const REMEDIATION_TIMEOUT_SECS: u64 = 30;

pub const CIRCUIT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Failure-free time after which an integration's failure count is cleared (seconds).
pub const QUIET_PERIOD_SECS: u64 = 3_600;

/// Upper bound on waiting for a notification sink (seconds).
pub const NOTIFY_TIMEOUT_SECS: u64 = 10;

/// Time allowed for in-flight healing tasks at shutdown (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

// ============================================================================
// Reconciliation
// ============================================================================

pub const RECONCILE_INTERVAL_SECS: u64 = 300;

/// Consecutive snapshots an entity may be missing from before removal.
pub const MISSING_CYCLES_BEFORE_REMOVAL: u32 = 3;

// ============================================================================
// Storage / Server
// ============================================================================

pub const DATA_DIR: &str = "./data";
pub const RETENTION_DAYS: u32 = 30;
pub const SERVER_ADDR: &str = "127.0.0.1:8088";
