//! Swappable GitHub client slot with refresh-on-403.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::client::GitHubClient;
use super::error::GitHubError;
use crate::credentials::CredentialsProvider;

/// Holds the current client for one run. Credentials are scoped to the
/// provider's identity url.
pub struct GitHubClientAdapter {
    credentials: Arc<dyn CredentialsProvider>,
    identity_url: String,
    api_base_url: String,
    current: RwLock<Option<Arc<GitHubClient>>>,
}

impl GitHubClientAdapter {
    pub fn new(
        credentials: Arc<dyn CredentialsProvider>,
        identity_url: impl Into<String>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            identity_url: identity_url.into(),
            api_base_url: api_base_url.into(),
            current: RwLock::new(None),
        }
    }

    /// Current client, building one on first use.
    pub async fn client(&self) -> Result<Arc<GitHubClient>, GitHubError> {
        if let Some(client) = self.current.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut slot = self.current.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = self.build().await?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Unconditionally fetch new credentials and swap the slot.
    pub async fn refresh(&self) -> Result<Arc<GitHubClient>, GitHubError> {
        let mut slot = self.current.write().await;
        let client = self.build().await?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Replace `stale` with a fresh client. When another task already swapped
    /// the slot, its client is reused.
    pub async fn refresh_from(
        &self,
        stale: &Arc<GitHubClient>,
    ) -> Result<Arc<GitHubClient>, GitHubError> {
        let mut slot = self.current.write().await;
        if let Some(current) = slot.as_ref()
            && !Arc::ptr_eq(current, stale)
        {
            return Ok(current.clone());
        }
        let client = self.build().await?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Run `op` with the current client; on 403 refresh and run it once more.
    /// A second failure is returned as is.
    pub async fn with_refresh<T, F, Fut>(&self, op: F) -> Result<T, GitHubError>
    where
        F: Fn(Arc<GitHubClient>) -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        let client = self.client().await?;
        match op(client.clone()).await {
            Err(err) if err.is_forbidden() => {
                debug!("Token expired or rate limit reached, refreshing");
                let fresh = self.refresh_from(&client).await?;
                op(fresh).await
            }
            result => result,
        }
    }

    async fn build(&self) -> Result<Arc<GitHubClient>, GitHubError> {
        let credentials = self.credentials.get_credentials(&self.identity_url).await?;
        debug!(credential_type = ?credentials.credential_type, "Built GitHub client");
        Ok(Arc::new(GitHubClient::new(
            self.api_base_url.clone(),
            credentials,
        )))
    }
}
