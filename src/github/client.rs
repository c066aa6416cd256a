//! Thin REST client over the organization, repository hook, and audit-log
//! endpoints.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::error::GitHubError;
use super::link::AuditCursor;
use super::types::{AuditLogEntry, Hook, Page, Repository};
use crate::credentials::GithubCredentials;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const PAGE_SIZE: u32 = 100;

const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = "moonlight-webhook-provider";

/// Audit-log phrase matching every action that can change a repository hook.
pub const HOOK_ACTIONS_PHRASE: &str = "action:hook.config_changed OR action:hook.events_changed OR action:hook.destroy OR action:hook.active_changed OR action:hook.create OR action:hook.delete OR action:hook.update";

/// Parameters for one audit-log page request.
#[derive(Debug, Clone)]
pub struct AuditLogQuery {
    /// ISO8601 lower bound, fixed for the whole pass.
    pub created_after: String,
    pub phrase: String,
    pub cursor: Option<AuditCursor>,
}

/// Client bound to one set of credentials. Refreshing credentials means
/// building a new client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    credentials: GithubCredentials,
}

impl GitHubClient {
    pub fn new(base_url: impl Into<String>, credentials: GithubCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &GithubCredentials {
        &self.credentials
    }

    /// `GET /orgs/{org}/repos?per_page=100&page=N`
    pub async fn list_org_repos(&self, org: &str, page: u32) -> Result<Vec<Repository>, GitHubError> {
        let mut url = Url::parse(&format!("{}/orgs/{}/repos", self.base_url, org))?;
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string());
        let (repos, _) = self.get_json(url).await?;
        Ok(repos)
    }

    /// `GET /repos/{owner}/{repo}/hooks?per_page=100&page=N`
    pub async fn list_repo_hooks(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Hook>, GitHubError> {
        let mut url = Url::parse(&format!("{}/repos/{}/{}/hooks", self.base_url, owner, repo))?;
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string());
        let (hooks, _) = self.get_json(url).await?;
        Ok(hooks)
    }

    /// `GET /orgs/{org}/audit-log` with the hook phrase; returns the Link header
    /// alongside the entries.
    pub async fn audit_log(
        &self,
        org: &str,
        query: &AuditLogQuery,
    ) -> Result<Page<AuditLogEntry>, GitHubError> {
        let mut url = Url::parse(&format!("{}/orgs/{}/audit-log", self.base_url, org))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("include", "web")
                .append_pair("created_after", &query.created_after)
                .append_pair("phrase", &query.phrase);
            if let Some(cursor) = &query.cursor {
                let (key, value) = cursor.query_pair();
                pairs.append_pair(key, &value);
            }
        }
        let (items, link) = self.get_json(url).await?;
        Ok(Page { items, link })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<(T, Option<String>), GitHubError> {
        debug!(%url, "GitHub request");
        let mut request = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT_HEADER);
        if let Some(authorization) = self.credentials.authorization_header() {
            request = request.header("Authorization", authorization);
        }

        let response = request.send().await?;

        if let Some(remaining) = response
            .headers()
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
            && remaining < 100
        {
            warn!("GitHub API rate limit running low: {} remaining", remaining);
        }

        let link = response
            .headers()
            .get("Link")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(GitHubError::ApiError { status, message });
        }

        Ok((response.json().await?, link))
    }
}
