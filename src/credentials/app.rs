//! GitHub App installation tokens with a static-token fallback.
//!
//! Tokens are cached per owner and treated as expired ten minutes before
//! GitHub's own expiry to absorb clock skew. Issuance for one owner holds only
//! that owner's slot, so other owners are served meanwhile.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use super::{CredentialType, CredentialsError, CredentialsProvider, GithubCredentials};

const EXPIRY_GRACE_MINUTES: i64 = 10;

const INSTALLATIONS_PAGE_SIZE: usize = 100;

/// Accept header required by App endpoints on GitHub Enterprise; ignored by github.com.
const APP_ACCEPT_HEADER: &str = "application/vnd.github.machine-man-preview+json";

#[derive(Debug, Clone)]
pub struct GithubAppConfig {
    pub app_id: u64,
    /// PEM-encoded RSA key; literal `\n` sequences are accepted.
    pub private_key: String,
    /// When set, only these owners get app tokens; others fall back.
    pub allowed_installation_owners: Option<Vec<String>>,
}

/// One GitHub host and the ways to authenticate against it.
#[derive(Debug, Clone)]
pub struct GithubIntegration {
    pub host: String,
    pub api_base_url: String,
    pub token: Option<String>,
    pub app: Option<GithubAppConfig>,
}

#[derive(Debug, Clone)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct Installation {
    id: u64,
    #[serde(default)]
    account: Option<InstallationAccount>,
    #[serde(default)]
    suspended_by: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct InstallationAccount {
    #[serde(default)]
    login: Option<String>,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

type TokenSlot = Arc<Mutex<Option<InstallationToken>>>;

pub struct IntegrationCredentialsProvider {
    integration: GithubIntegration,
    http: reqwest::Client,
    slots: Mutex<HashMap<String, TokenSlot>>,
}

impl IntegrationCredentialsProvider {
    pub fn new(integration: GithubIntegration) -> Self {
        Self {
            integration,
            http: reqwest::Client::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.integration.api_base_url.trim_end_matches('/'), path)
    }

    fn app_jwt(&self, app: &GithubAppConfig) -> Result<String, CredentialsError> {
        let now = Utc::now();
        let claims = AppClaims {
            iat: (now - Duration::seconds(60)).timestamp(),
            exp: (now + Duration::minutes(9)).timestamp(),
            iss: app.app_id.to_string(),
        };
        let pem = app.private_key.replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())?;
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }

    fn owner_allowed(app: &GithubAppConfig, owner: &str) -> bool {
        match &app.allowed_installation_owners {
            Some(owners) => owners.iter().any(|allowed| allowed == owner),
            None => true,
        }
    }

    async fn installations_page(
        &self,
        jwt: &str,
        page: u32,
    ) -> Result<Vec<Installation>, CredentialsError> {
        let response = self
            .http
            .get(self.api_url(&format!(
                "/app/installations?per_page={}&page={}",
                INSTALLATIONS_PAGE_SIZE, page
            )))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", APP_ACCEPT_HEADER)
            .header("User-Agent", "moonlight-webhook-provider")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CredentialsError::Api { status, message });
        }
        Ok(response.json().await?)
    }

    /// Page through the app's installations until `owner` turns up or a
    /// short page ends the listing.
    async fn find_installation(
        &self,
        app: &GithubAppConfig,
        jwt: &str,
        owner: &str,
    ) -> Result<Installation, CredentialsError> {
        let mut page = 1;
        loop {
            let installations = self.installations_page(jwt, page).await?;
            let last_page = installations.len() < INSTALLATIONS_PAGE_SIZE;
            if let Some(found) = installations.into_iter().find(|installation| {
                installation
                    .account
                    .as_ref()
                    .and_then(|account| account.login.as_deref())
                    .is_some_and(|login| login.eq_ignore_ascii_case(owner))
            }) {
                return Ok(found);
            }
            if last_page {
                break;
            }
            page += 1;
        }
        debug!(owner, pages = page, "Searched app installations");
        Err(CredentialsError::InstallationNotFound {
            owner: owner.to_string(),
            app_id: app.app_id,
        })
    }

    async fn issue_installation_token(
        &self,
        app: &GithubAppConfig,
        owner: &str,
    ) -> Result<InstallationToken, CredentialsError> {
        let jwt = self.app_jwt(app)?;
        let installation = self.find_installation(app, &jwt, owner).await?;
        if installation.suspended_by.as_ref().is_some_and(|by| !by.is_null()) {
            return Err(CredentialsError::InstallationSuspended {
                owner: owner.to_string(),
            });
        }

        let response = self
            .http
            .post(self.api_url(&format!(
                "/app/installations/{}/access_tokens",
                installation.id
            )))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", APP_ACCEPT_HEADER)
            .header("User-Agent", "moonlight-webhook-provider")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CredentialsError::Api { status, message });
        }

        let issued: AccessTokenResponse = response.json().await?;
        debug!(
            installation_id = installation.id,
            expires_at = %issued.expires_at,
            "Issued GitHub App installation token"
        );
        Ok(InstallationToken {
            token: issued.token,
            expires_at: issued.expires_at - Duration::minutes(EXPIRY_GRACE_MINUTES),
        })
    }

    async fn app_token(
        &self,
        app: &GithubAppConfig,
        owner: &str,
    ) -> Result<Option<String>, CredentialsError> {
        let slot = self
            .slots
            .lock()
            .await
            .entry(owner.to_string())
            .or_default()
            .clone();
        let mut cached = slot.lock().await;
        if let Some(current) = cached.as_ref()
            && current.expires_at > Utc::now()
        {
            return Ok(Some(current.token.clone()));
        }

        match self.issue_installation_token(app, owner).await {
            Ok(issued) => {
                let token = issued.token.clone();
                *cached = Some(issued);
                Ok(Some(token))
            }
            Err(CredentialsError::InstallationNotFound { owner, app_id }) => {
                warn!(%owner, app_id, "No app installation found, falling back to token");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl CredentialsProvider for IntegrationCredentialsProvider {
    async fn get_credentials(&self, url: &str) -> Result<GithubCredentials, CredentialsError> {
        let parsed = Url::parse(url).map_err(|source| CredentialsError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if parsed.host_str() != Some(self.integration.host.as_str()) {
            return Err(CredentialsError::NoIntegration {
                url: url.to_string(),
            });
        }

        let owner = parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string);

        if let (Some(app), Some(owner)) = (&self.integration.app, owner.as_deref())
            && Self::owner_allowed(app, owner)
            && let Some(token) = self.app_token(app, owner).await?
        {
            return Ok(GithubCredentials {
                token: Some(token),
                credential_type: CredentialType::App,
            });
        }

        Ok(GithubCredentials {
            token: self.integration.token.clone(),
            credential_type: CredentialType::Token,
        })
    }
}
