//! # Reconciliation
//!
//! Builds the webhook change map from GitHub, either by scanning every
//! repository in the organization or by reading the audit log since the last
//! run, and turns it into catalog `Resource` entities.
//!
//! The change map is keyed by delivery url, then by repository short name.
//! Both levels are ordered so two passes over the same GitHub state produce
//! the same entity order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod audit;
pub mod full_scan;
pub mod index;
pub mod materialize;

pub use index::{CatalogSnapshot, RepositoryIndex, load_snapshot};
pub use materialize::{materialize, materialize_changes, merge_dependencies, webhook_name};

/// What happened to a webhook on one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    Added,
    Removed,
}

/// Repository short name to hook state.
pub type RepoStates = BTreeMap<String, HookState>;

/// Webhook url to the repositories it was observed on.
pub type Changes = BTreeMap<String, RepoStates>;
