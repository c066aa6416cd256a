//! # GitHub
//!
//! REST access to organization repositories, repository hooks, and the
//! organization audit log, plus the client slot that is refreshed when
//! GitHub answers 403.

pub mod adapter;
pub mod client;
pub mod error;
pub mod link;
pub mod types;

pub use adapter::GitHubClientAdapter;
pub use client::{AuditLogQuery, DEFAULT_API_BASE, GitHubClient, HOOK_ACTIONS_PHRASE, PAGE_SIZE};
pub use error::GitHubError;
pub use link::{AuditCursor, next_cursor, next_link};
pub use types::{AuditLogEntry, Hook, HookConfig, Page, Repository};
