//! Enumerate every repository in the organization and every hook on it.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::{Changes, HookState};
use crate::github::{GitHubClientAdapter, GitHubError};

#[derive(Debug, Clone)]
pub struct FullScanOptions {
    pub org: String,
    /// Repositories whose hooks are fetched concurrently in one batch.
    pub concurrency: usize,
    /// Stop listing repositories after this many pages.
    pub max_pages: Option<u32>,
}

/// Page through `GET /orgs/{org}/repos` until an empty page. A 403 refreshes
/// credentials and retries the same page once; any other failure aborts.
pub async fn list_repositories(
    adapter: &GitHubClientAdapter,
    org: &str,
    max_pages: Option<u32>,
) -> Result<Vec<String>, GitHubError> {
    let mut repositories = Vec::new();
    let mut page = 1;
    loop {
        let repos = adapter
            .with_refresh(|client| async move { client.list_org_repos(org, page).await })
            .await
            .inspect_err(|err| error!(org, page, error = %err, "Failed to list repositories"))?;

        if repos.is_empty() {
            break;
        }
        debug!("Processing page {} with {} repositories", page, repos.len());
        repositories.extend(repos.into_iter().map(|repo| repo.name));

        if max_pages.is_some_and(|max| page >= max) {
            debug!(page, "Reached repository page limit");
            break;
        }
        page += 1;
    }
    Ok(repositories)
}

/// Delivery urls of every hook on one repository.
pub async fn repository_hook_urls(
    adapter: &GitHubClientAdapter,
    org: &str,
    repo: &str,
) -> Result<Vec<String>, GitHubError> {
    let mut urls = Vec::new();
    let mut page = 1;
    loop {
        let hooks = adapter
            .with_refresh(|client| async move { client.list_repo_hooks(org, repo, page).await })
            .await?;
        if hooks.is_empty() {
            break;
        }
        urls.extend(hooks.iter().filter_map(|hook| hook.delivery_url()).map(str::to_string));
        page += 1;
    }
    Ok(urls)
}

/// Build a fresh change map covering the whole organization.
///
/// Repositories are processed in sequential batches; each batch spawns one
/// task per repository and is fully awaited before the next starts. A
/// repository whose hooks cannot be listed is logged and left out.
pub async fn collect_changes(
    adapter: Arc<GitHubClientAdapter>,
    options: &FullScanOptions,
) -> Result<Changes, GitHubError> {
    let repositories = list_repositories(&adapter, &options.org, options.max_pages).await?;
    info!(
        repositories = repositories.len(),
        concurrency = options.concurrency,
        "Scanning repository webhooks"
    );

    let mut changes = Changes::new();
    let mut failed = 0usize;

    for batch in repositories.chunks(options.concurrency.max(1)) {
        let mut handles = Vec::with_capacity(batch.len());
        for repo in batch {
            let adapter = adapter.clone();
            let org = options.org.clone();
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let result = repository_hook_urls(&adapter, &org, &repo).await;
                (repo, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((repo, Ok(urls))) => {
                    for url in urls {
                        changes.entry(url).or_default().insert(repo.clone(), HookState::Added);
                    }
                }
                Ok((repo, Err(err))) => {
                    failed += 1;
                    error!(repo = %repo, error = %err, "Failed to fetch webhooks for repo {}", repo);
                }
                Err(join_err) => {
                    failed += 1;
                    error!(error = %join_err, "Webhook fetch task panicked");
                }
            }
        }
    }

    info!(
        webhooks = changes.len(),
        failed_repositories = failed,
        "Repository webhook scan complete"
    );
    Ok(changes)
}
