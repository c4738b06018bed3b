//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! every endpoint using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tower::ServiceExt;

use hass_sentinel::api::{create_app, ApiState};
use hass_sentinel::cache::EntityStateCache;
use hass_sentinel::clock::SystemClock;
use hass_sentinel::config::HealthConfig;
use hass_sentinel::healing::{
    HealingOrchestrator, HealingPolicy, RemediationError, RemediationExecutor, StaticResolver,
};
use hass_sentinel::health::{HealthMonitor, SharedHealthMonitor};
use hass_sentinel::notify::MemoryNotifier;
use hass_sentinel::storage::InMemoryRecorder;
use hass_sentinel::types::{ConnectionState, EntityState, RemediationStrategy, StreamStatus};
use hass_sentinel::Sentinel;

struct AlwaysWorks;

#[async_trait]
impl RemediationExecutor for AlwaysWorks {
    async fn reload(&self, _integration_id: &str) -> Result<(), RemediationError> {
        Ok(())
    }

    fn strategy(&self) -> RemediationStrategy {
        RemediationStrategy::ReloadIntegration
    }
}

fn create_test_state() -> ApiState {
    let now = Utc::now();
    let cache = Arc::new(EntityStateCache::new());
    cache.seed(vec![
        EntityState {
            entity_id: "light.porch".to_string(),
            state: "unavailable".to_string(),
            attributes: Default::default(),
            last_changed: now - Duration::seconds(900),
            last_updated: now - Duration::seconds(900),
        },
        EntityState {
            entity_id: "sensor.outdoor".to_string(),
            state: "12.5".to_string(),
            attributes: Default::default(),
            last_changed: now,
            last_updated: now,
        },
    ]);

    let health = SharedHealthMonitor::new(HealthMonitor::new(&HealthConfig::default()));
    health.lock().evaluate_all(&cache.all(), now);

    let mut mappings = BTreeMap::new();
    mappings.insert("light.*".to_string(), "hue".to_string());
    let recorder = Arc::new(InMemoryRecorder::new());
    let clock = Arc::new(SystemClock);
    let orchestrator = Arc::new(HealingOrchestrator::new(
        HealingPolicy::default(),
        Arc::new(StaticResolver::new(&mappings)),
        Arc::new(AlwaysWorks),
        Arc::new(MemoryNotifier::new()),
        recorder.clone(),
        clock.clone(),
    ));
    let stream = Arc::new(RwLock::new(StreamStatus {
        state: ConnectionState::Subscribed,
        events_received: 42,
        ..StreamStatus::default()
    }));

    ApiState::new(Sentinel::new(cache, health, orchestrator, stream, recorder, clock))
}

async fn send(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_reports_stream_and_entity_count() {
    let (status, body) = send(create_app(create_test_state()), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["stream"], "subscribed");
    assert_eq!(body["data"]["monitored_entities"], 2);
    assert!(body["meta"]["timestamp"].is_string());
}

#[tokio::test]
async fn test_status_lists_open_issues() {
    let (status, body) = send(create_app(create_test_state()), "GET", "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);

    let data = &body["data"];
    assert_eq!(data["monitored_entity_count"], 2);
    assert_eq!(data["stream"]["events_received"], 42);
    let issues = data["open_issues"].as_array().unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["entity_id"], "light.porch");
    assert_eq!(issues[0]["issue_type"], "unavailable");
    assert!(data["per_integration_circuit_state"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_heal_dry_run() {
    let state = create_test_state();
    let (status, body) = send(
        create_app(state.clone()),
        "POST",
        "/api/v1/heal/light.porch?dry_run=true",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"]["kind"], "dry_run");
    assert_eq!(body["data"]["integration_id"], "hue");
    assert_eq!(body["data"]["success"], true);

    // Nothing recorded for a dry run
    let (_, recent) = send(create_app(state), "GET", "/api/v1/patterns/recent").await;
    assert!(recent["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_heal_then_patterns_reflect_outcome() {
    let state = create_test_state();
    let (status, body) = send(create_app(state.clone()), "POST", "/api/v1/heal/light.porch").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"]["kind"], "remediated");
    assert_eq!(body["data"]["action"]["strategy"], "reload_integration");

    let (_, recent) = send(create_app(state.clone()), "GET", "/api/v1/patterns/recent?limit=5").await;
    let outcomes = recent["data"].as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["entity_id"], "light.porch");

    let (_, summary) = send(create_app(state.clone()), "GET", "/api/v1/patterns/integrations").await;
    let integrations = summary["data"].as_array().unwrap();
    assert_eq!(integrations[0]["integration_id"], "hue");
    assert_eq!(integrations[0]["successes"], 1);

    // Cooldown now applies to manual requests too
    let (_, again) = send(create_app(state.clone()), "POST", "/api/v1/heal/light.porch").await;
    assert_eq!(again["data"]["action"]["kind"], "escalated");
    assert_eq!(again["data"]["action"]["reason"], "cooldown_active");

    let (_, status) = send(create_app(state), "GET", "/api/v1/status").await;
    let hue = &status["data"]["per_integration_circuit_state"]["hue"];
    assert_eq!(hue["circuit"]["state"], "closed");
}

#[tokio::test]
async fn test_heal_unresolvable_entity_escalates() {
    let (status, body) = send(
        create_app(create_test_state()),
        "POST",
        "/api/v1/heal/switch.unknown_plug",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"]["reason"], "unresolvable");
    assert_eq!(body["data"]["success"], false);
}

#[tokio::test]
async fn test_heal_rejects_malformed_entity_id() {
    for uri in ["/api/v1/heal/porch", "/api/v1/heal/.porch", "/api/v1/heal/light."] {
        let (status, body) = send(create_app(create_test_state()), "POST", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn test_heal_requires_post() {
    let (status, _) = send(create_app(create_test_state()), "GET", "/api/v1/heal/light.porch").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (status, _) = send(create_app(create_test_state()), "GET", "/api/v1/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
