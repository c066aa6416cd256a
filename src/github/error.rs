//! GitHub API errors.

use thiserror::Error;

use crate::credentials::CredentialsError;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("API request failed with status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),
}

impl GitHubError {
    /// HTTP status returned by GitHub, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::ApiError { status, .. } => Some(*status),
            GitHubError::NetworkError(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// 403: expired installation token or exhausted rate limit.
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}
