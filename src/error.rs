//! # Error Handling
//!
//! `ProviderError` is what a provider run returns. `ApiError` is the
//! problem+json body the ops server answers with.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::catalog::{CatalogError, ConnectionError};
use crate::github::GitHubError;
use crate::scheduler::SchedulerError;
use crate::telemetry;

/// Failure of a single provider run.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("GitHub request failed: {0}")]
    GitHub(#[from] GitHubError),

    #[error("catalog query failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("catalog connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("failed to schedule refresh task: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("provider is not connected")]
    NotConnected,
}

/// Problem+json error body
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip_serializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Trace ID of the active run or request, or a generated correlation ID.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ProviderError> for ApiError {
    fn from(error: ProviderError) -> Self {
        tracing::error!(error = %error, "Provider run failed");
        match &error {
            ProviderError::GitHub(github) => {
                let status = github.status();
                ApiError::new(
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_ERROR",
                    "GitHub request failed",
                )
                .with_details(serde_json::json!({
                    "provider": "github",
                    "status": status,
                }))
            }
            ProviderError::Catalog(_) => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "CATALOG_ERROR",
                "Catalog query failed",
            ),
            ProviderError::Connection(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONNECTION_ERROR".to_string(),
                err.to_string(),
            ),
            ProviderError::Scheduler(err) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SCHEDULER_ERROR".to_string(),
                err.to_string(),
            ),
            ProviderError::NotConnected => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_CONNECTED",
                "Provider is not connected",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn github_failure_maps_to_bad_gateway() {
        let error = ProviderError::GitHub(GitHubError::ApiError {
            status: 500,
            message: "boom".to_string(),
        });
        let api: ApiError = error.into();
        assert_eq!(api.status, StatusCode::BAD_GATEWAY);
        assert_eq!(&*api.code, "PROVIDER_ERROR");
        assert_eq!(api.details.as_deref().unwrap()["status"], 500);
        assert!(api.trace_id.is_some());
    }

    #[test]
    fn not_connected_maps_to_unavailable() {
        let api: ApiError = ProviderError::NotConnected.into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&*api.code, "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn response_uses_problem_json() {
        let response = ApiError::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", "nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "PROVIDER_ERROR");
        assert_eq!(json["message"], "nope");
    }
}
