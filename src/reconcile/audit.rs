//! Incremental reconciliation from the organization audit log.

use tracing::{debug, error};

use super::index::CatalogSnapshot;
use super::materialize::{WEBHOOK_URL_ANNOTATION, materialize_changes, merge_dependencies};
use super::{Changes, HookState};
use crate::catalog::Entity;
use crate::github::{
    AuditCursor, AuditLogEntry, AuditLogQuery, GitHubClientAdapter, GitHubError,
    HOOK_ACTIONS_PHRASE, next_cursor,
};

/// Audit actions that take a hook off a repository.
const REMOVED_ACTIONS: [&str; 2] = ["hook.destroy", "hook.deleted"];

pub fn classify(action: &str) -> HookState {
    if REMOVED_ACTIONS.contains(&action) {
        HookState::Removed
    } else {
        HookState::Added
    }
}

/// Fold one page of entries into `changes`. Entries without a repository or a
/// hook url are skipped. The log is newest first, so a (url, repo) pair that
/// is already recorded keeps its state.
pub fn record_entries(changes: &mut Changes, org: &str, entries: &[AuditLogEntry]) {
    let prefix = format!("{}/", org);
    for entry in entries {
        let (Some(repo), Some(url)) = (entry.repo.as_deref(), entry.hook_url()) else {
            continue;
        };
        let repo = repo.strip_prefix(&prefix).unwrap_or(repo);
        changes
            .entry(url.to_string())
            .or_default()
            .entry(repo.to_string())
            .or_insert_with(|| classify(&entry.action));
    }
}

/// Read every audit-log page created after `created_after` and build the delta.
pub async fn collect_changes(
    adapter: &GitHubClientAdapter,
    org: &str,
    created_after: &str,
) -> Result<Changes, GitHubError> {
    let mut changes = Changes::new();
    let mut cursor: Option<AuditCursor> = None;

    loop {
        debug!(cursor = ?cursor, "fetching audit logs page");
        let query = AuditLogQuery {
            created_after: created_after.to_string(),
            phrase: HOOK_ACTIONS_PHRASE.to_string(),
            cursor: cursor.clone(),
        };
        let page = adapter
            .with_refresh(|client| {
                let query = &query;
                async move { client.audit_log(org, query).await }
            })
            .await
            .inspect_err(|err| error!(org, error = %err, "Failed to read audit log"))?;

        record_entries(&mut changes, org, &page.items);

        match next_cursor(page.link.as_deref()) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    debug!("found {} hooks", changes.len());
    Ok(changes)
}

/// Merge the delta into the known webhooks and materialize the urls that no
/// known webhook claims. Known webhooks come first, in catalog order.
pub fn apply_changes(snapshot: CatalogSnapshot, mut changes: Changes) -> Vec<Entity> {
    let CatalogSnapshot {
        index,
        known_webhooks,
    } = snapshot;

    let mut webhooks = Vec::with_capacity(known_webhooks.len());
    for mut webhook in known_webhooks {
        let url = webhook.annotation(WEBHOOK_URL_ANNOTATION).unwrap_or_default().to_string();
        if let Some(repos) = changes.remove(&url) {
            merge_dependencies(&mut webhook, &repos, &index);
        }
        webhooks.push(webhook);
    }

    let created = materialize_changes(&changes, &index, &webhooks);
    debug!("found {} new webhooks", created.len());
    webhooks.extend(created);
    webhooks
}

/// Read the audit log and reconcile it against the snapshot.
pub async fn reconcile(
    adapter: &GitHubClientAdapter,
    org: &str,
    created_after: &str,
    snapshot: CatalogSnapshot,
) -> Result<Vec<Entity>, GitHubError> {
    let changes = collect_changes(adapter, org, created_after).await?;
    Ok(apply_changes(snapshot, changes))
}
