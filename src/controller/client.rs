//! REST client for the controller API

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::StateSource;
use crate::config::ControllerConfig;
use crate::types::{EntityState, StateEvent};

/// Controller REST errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Controller returned status {status}: {body}")]
    ServerError { status: StatusCode, body: String },
    #[error("Access token rejected")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("No access token configured (set controller.token or ${0})")]
    MissingToken(String),
}

impl ControllerError {
    /// Transient errors are worth retrying; the rest need operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ServerError { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Response of the config-entry reload endpoint
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ReloadResponse {
    #[serde(default)]
    pub require_restart: bool,
}

/// HTTP client for the controller's REST API
#[derive(Clone)]
pub struct ControllerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ControllerClient {
    pub fn new(config: &ControllerConfig) -> Result<Self, ControllerError> {
        let token = config
            .access_token()
            .ok_or_else(|| ControllerError::MissingToken(config.token_env.clone()))?;
        Self::with_token(&config.url, &token, config.request_timeout())
    }

    pub fn with_token(
        base_url: &str,
        token: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, ControllerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, ControllerError> {
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ControllerError::Unauthorized),
            StatusCode::NOT_FOUND => Err(ControllerError::NotFound(what.to_string())),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ControllerError::ServerError { status, body })
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ControllerError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let resp = Self::check(resp, path).await?;
        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, ControllerError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::check(resp, path).await
    }

    /// Verify the API is reachable and the token accepted.
    pub async fn ping(&self) -> Result<(), ControllerError> {
        let _: Value = self.get_json("/api/", &[]).await?;
        Ok(())
    }

    /// Current state of every entity.
    pub async fn get_states(&self) -> Result<Vec<EntityState>, ControllerError> {
        self.get_json("/api/states", &[]).await
    }

    /// Recorded state changes since `since` for the given entities.
    ///
    /// The history endpoint returns one list per entity; the result is
    /// flattened, filtered to strictly newer records and sorted by time.
    pub async fn get_history(
        &self,
        since: DateTime<Utc>,
        entity_ids: &[String],
    ) -> Result<Vec<StateEvent>, ControllerError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let start = since.to_rfc3339_opts(SecondsFormat::Micros, true);
        let query = [
            ("filter_entity_id", entity_ids.join(",")),
            ("end_time", Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        ];
        let per_entity: Vec<Vec<EntityState>> = self
            .get_json(&format!("/api/history/period/{start}"), &query)
            .await?;

        let mut events: Vec<StateEvent> = per_entity
            .into_iter()
            .flatten()
            .filter(|s| s.last_updated > since)
            .map(StateEvent::from)
            .collect();
        events.sort_by_key(|e| e.timestamp);
        debug!(since = %since, records = events.len(), "Fetched history");
        Ok(events)
    }

    /// Reload an integration's config entry.
    pub async fn reload_config_entry(&self, entry_id: &str) -> Result<ReloadResponse, ControllerError> {
        let resp = self
            .post(&format!("/api/config/config_entries/entry/{entry_id}/reload"), &json!({}))
            .await?;
        Ok(resp.json().await.unwrap_or_default())
    }

    /// Call a controller service.
    pub async fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), ControllerError> {
        self.post(&format!("/api/services/{domain}/{service}"), data).await?;
        Ok(())
    }

    /// Render a template on the controller and return the text output.
    pub async fn render_template(&self, template: &str) -> Result<String, ControllerError> {
        let resp = self.post("/api/template", &json!({ "template": template })).await?;
        Ok(resp.text().await?.trim().to_string())
    }

    /// Config entry id owning an entity, via the `config_entry_id` template function.
    pub async fn config_entry_for(&self, entity_id: &str) -> Result<Option<String>, ControllerError> {
        let rendered = self
            .render_template(&format!("{{{{ config_entry_id('{entity_id}') }}}}"))
            .await?;
        Ok(parse_template_id(&rendered))
    }

    /// Raise a persistent notification in the controller UI.
    pub async fn create_notification(
        &self,
        title: &str,
        message: &str,
        notification_id: &str,
    ) -> Result<(), ControllerError> {
        let data = json!({
            "title": title,
            "message": message,
            "notification_id": notification_id,
        });
        self.call_service("persistent_notification", "create", &data)
            .await
    }
}

/// Template output for a missing value renders as `None` or nothing.
fn parse_template_id(rendered: &str) -> Option<String> {
    let id = rendered.trim().trim_matches('"');
    if id.is_empty() || id == "None" || id == "null" {
        None
    } else {
        Some(id.to_string())
    }
}

#[async_trait]
impl StateSource for ControllerClient {
    async fn fetch_states(&self) -> Result<Vec<EntityState>, ControllerError> {
        self.get_states().await
    }

    async fn history_since(
        &self,
        since: DateTime<Utc>,
        entity_ids: &[String],
    ) -> Result<Vec<StateEvent>, ControllerError> {
        self.get_history(since, entity_ids).await
    }
}
