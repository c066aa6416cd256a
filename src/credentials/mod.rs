//! # Credentials
//!
//! Short-lived GitHub credentials scoped to a URL. The provider asks for
//! credentials once per client build and again whenever GitHub answers 403.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;

pub mod app;

pub use app::{GithubAppConfig, GithubIntegration, IntegrationCredentialsProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// Installation token issued for a GitHub App.
    App,
    /// Personal or machine-user token from configuration.
    Token,
}

#[derive(Clone, PartialEq, Eq)]
pub struct GithubCredentials {
    /// `None` means anonymous access.
    pub token: Option<String>,
    pub credential_type: CredentialType,
}

impl std::fmt::Debug for GithubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubCredentials")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("credential_type", &self.credential_type)
            .finish()
    }
}

impl GithubCredentials {
    /// Value for the `Authorization` header, if any.
    pub fn authorization_header(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {}", token))
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("there is no GitHub integration that matches {url}")]
    NoIntegration { url: String },

    #[error("invalid credentials url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to sign GitHub App JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("no app installation found for {owner} in {app_id}")]
    InstallationNotFound { owner: String, app_id: u64 },

    #[error("the GitHub application for {owner} is suspended")]
    InstallationSuspended { owner: String },

    #[error("GitHub App request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error while issuing credentials: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_credentials(&self, url: &str) -> Result<GithubCredentials, CredentialsError>;
}

/// Hands out the same configured token for every URL.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialsProvider for StaticTokenProvider {
    async fn get_credentials(&self, _url: &str) -> Result<GithubCredentials, CredentialsError> {
        Ok(GithubCredentials {
            token: self.token.clone(),
            credential_type: CredentialType::Token,
        })
    }
}

/// App-backed provider when a GitHub App is configured, static token otherwise.
pub fn provider_from_config(config: &AppConfig) -> Arc<dyn CredentialsProvider> {
    match (config.github_app_id, &config.github_app_private_key) {
        (Some(app_id), Some(private_key)) => {
            let integration = GithubIntegration {
                host: config
                    .github_host()
                    .unwrap_or_else(|| "github.com".to_string()),
                api_base_url: config.github_api_base.clone(),
                token: config.github_token.clone(),
                app: Some(GithubAppConfig {
                    app_id,
                    private_key: private_key.clone(),
                    allowed_installation_owners: (!config.github_app_allowed_owners.is_empty())
                        .then(|| config.github_app_allowed_owners.clone()),
                }),
            };
            Arc::new(IntegrationCredentialsProvider::new(integration))
        }
        _ => Arc::new(StaticTokenProvider::new(config.github_token.clone())),
    }
}
