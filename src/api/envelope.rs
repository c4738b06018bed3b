//! JSON envelope for the sentinel API
//!
//! Success bodies are `{ "data": T, "meta": { ... } }` and failures are
//! `{ "error": { "code", "message" }, "meta": { ... } }`. `meta` carries the
//! daemon version so `hass-sentinel status` can flag a mismatched binary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StorageError;

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

impl ResponseMeta {
    fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::now(),
        };
        (StatusCode::OK, axum::Json(body)).into_response()
    }
}

/// Request failures surfaced to API clients.
///
/// Healing decisions are never errors here; an escalated heal is a 200 with
/// the outcome in `data`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("'{0}' is not an entity id (expected domain.object_id)")]
    InvalidEntityId(String),
    #[error("pattern store unavailable: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidEntityId(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidEntityId(_) => "BAD_REQUEST",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    meta: ResponseMeta,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "API request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
            meta: ResponseMeta::now(),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ok_response_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"entities": 3}));
        assert_eq!(resp.status(), StatusCode::OK);

        let v = body(resp).await;
        assert_eq!(v["data"]["entities"], 3);
        assert_eq!(v["meta"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(v["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_entity_id_is_bad_request() {
        let resp = ApiError::InvalidEntityId("porch".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let v = body(resp).await;
        assert_eq!(v["error"]["code"], "BAD_REQUEST");
        assert!(v["error"]["message"].as_str().unwrap().contains("'porch'"));
        assert!(v.get("meta").is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_is_server_error() {
        let truncated = serde_json::from_str::<serde_json::Value>("{\"entity_id\":").unwrap_err();
        let resp = ApiError::from(StorageError::from(truncated)).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(resp).await["error"]["code"], "STORAGE_ERROR");
    }
}
