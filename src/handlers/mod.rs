//! # API Handlers
//!
//! HTTP endpoint handlers for the ops server.

use axum::{extract::State, response::Json};
use serde::Serialize;
use uuid::Uuid;

use crate::catalog::Entity;
use crate::error::{ApiError, ProviderError};
use crate::provider::{PROVIDER_NAME, RunSummary};
use crate::server::AppState;
use crate::telemetry::{TraceContext, with_trace_context};

/// Basic service information
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub provider: String,
    pub org: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub run_id: String,
    pub entities: usize,
}

pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: PROVIDER_NAME.to_string(),
        org: state.config.github_org.clone(),
        last_run: state.provider.last_run().await,
    })
}

/// Entities currently published by the provider.
pub async fn entities(State(state): State<AppState>) -> Json<Vec<Entity>> {
    Json(state.connection.entities().await)
}

/// Run the provider now and wait for it to finish.
pub async fn refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, ApiError> {
    if !state.provider.is_connected().await {
        return Err(ProviderError::NotConnected.into());
    }

    let run_id = Uuid::new_v4().to_string();
    let context = TraceContext {
        trace_id: run_id.clone(),
    };
    with_trace_context(context, async {
        state.provider.run().await.map_err(ApiError::from)?;
        Ok::<_, ApiError>(Json(RefreshResponse {
            run_id: run_id.clone(),
            entities: state.connection.entities().await.len(),
        }))
    })
    .await
}
