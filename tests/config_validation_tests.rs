//! Config loading and validation from TOML files on disk

use std::io::Write;
use std::path::Path;

use hass_sentinel::config::{ConfigError, SentinelConfig};
use hass_sentinel::healing::HealingPolicy;
use hass_sentinel::types::RemediationStrategy;

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("sentinel.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn test_resolve_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[controller]
url = "https://ha.example.net"

[healing]
strategy = "reload_via_service"
max_attempts = 2
cooldown_secs = 600

[resolver.mappings]
"sensor.shelly_*" = "shelly"
"light.porch" = "3f2b9c"
"#,
    );

    let loaded = SentinelConfig::resolve(Some(&path)).unwrap();
    assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
    assert!(loaded.warnings.is_empty(), "unexpected warnings: {:?}", loaded.warnings);

    let config = loaded.config;
    assert_eq!(config.healing.strategy, RemediationStrategy::ReloadViaService);
    assert_eq!(config.healing.max_attempts, 2);
    assert_eq!(config.resolver.mappings.len(), 2);
    assert_eq!(
        config.controller.websocket_endpoint(),
        "wss://ha.example.net/api/websocket"
    );

    // Untouched sections keep their defaults
    assert_eq!(config.health.grace_period_secs, 300);

    let policy = HealingPolicy::from(&config.healing);
    assert_eq!(policy.cooldown, chrono::Duration::seconds(600));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SentinelConfig::resolve(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}

#[test]
fn test_typo_produces_warning_with_suggestion() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[healing]
max_atempts = 5
"#,
    );

    let loaded = SentinelConfig::resolve(Some(&path)).unwrap();
    let warning = loaded
        .warnings
        .iter()
        .find(|w| w.field == "healing.max_atempts")
        .expect("unknown key warning");
    assert_eq!(warning.suggestion.as_deref(), Some("healing.max_attempts"));
    // The misspelt key falls back to the default
    assert_eq!(loaded.config.healing.max_attempts, 3);
}

#[test]
fn test_invalid_values_collected_into_one_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[controller]
url = "ha.local:8123"

[stream]
reconnect_min_secs = 120
reconnect_max_secs = 60

[healing]
max_attempts = 0

[server]
addr = "not-an-address"
"#,
    );

    match SentinelConfig::resolve(Some(&path)) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 4, "{errors:?}");
            assert!(errors.iter().any(|e| e.contains("controller.url")));
            assert!(errors.iter().any(|e| e.contains("reconnect_min_secs")));
            assert!(errors.iter().any(|e| e.contains("healing.max_attempts")));
            assert!(errors.iter().any(|e| e.contains("server.addr")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[healing\nmax_attempts = 3");
    assert!(matches!(
        SentinelConfig::resolve(Some(&path)),
        Err(ConfigError::Parse(..))
    ));
}

#[test]
fn test_timing_conflicts_are_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[healing]
cooldown_secs = 600
circuit_reset_interval_secs = 120
"#,
    );

    let loaded = SentinelConfig::resolve(Some(&path)).unwrap();
    assert!(loaded
        .warnings
        .iter()
        .any(|w| w.field == "healing.circuit_reset_interval_secs"));
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved.toml");

    let mut config = SentinelConfig::default();
    config.health.grace_period_secs = 45;
    config.monitor.exclude_entities.push("sensor.debug_*".to_string());
    config.save_to_file(&path).unwrap();

    let loaded = SentinelConfig::resolve(Some(&path)).unwrap();
    assert_eq!(loaded.config.health.grace_period_secs, 45);
    assert_eq!(loaded.config.monitor.exclude_entities, vec!["sensor.debug_*".to_string()]);
}
