//! GitHub API response types used by the reconcilers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub id: u64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub config: HookConfig,
}

impl Hook {
    /// Delivery url, ignoring hooks configured without one.
    pub fn delivery_url(&self) -> Option<&str> {
        self.config.url.as_deref().filter(|url| !url.is_empty())
    }
}

/// One organization audit-log event. Only hook events are requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub action: String,
    /// `<org>/<repo>`
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub config: Option<HookConfig>,
    #[serde(default, rename = "@timestamp")]
    pub timestamp: Option<i64>,
}

impl AuditLogEntry {
    pub fn hook_url(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|config| config.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

/// A page of results plus the raw `Link` header that came with it.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub link: Option<String>,
}
