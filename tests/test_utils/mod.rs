//! Shared fixtures for provider integration tests.
//!
//! Catalog entities, counting credentials, and a provider wired against a
//! mock GitHub server with a manual schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use webhook_provider::catalog::{
    CatalogApi, CatalogError, EntitiesRequest, EntitiesResponse, Entity, MemoryConnection,
};
use webhook_provider::credentials::{
    CredentialType, CredentialsError, CredentialsProvider, GithubCredentials,
};
use webhook_provider::provider::{ProviderOptions, Schedule, WebhookProvider};
use webhook_provider::reconcile::{RepoStates, RepositoryIndex, materialize};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ORG: &str = "PicPay";

/// Hands out `token-0`, `token-1`, ... and counts requests.
#[derive(Default)]
pub struct CountingCredentials {
    calls: AtomicUsize,
}

impl CountingCredentials {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialsProvider for CountingCredentials {
    async fn get_credentials(&self, _url: &str) -> Result<GithubCredentials, CredentialsError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GithubCredentials {
            token: Some(format!("token-{}", n)),
            credential_type: CredentialType::App,
        })
    }
}

/// Catalog that always answers with the same entities.
pub struct StaticCatalog(pub Vec<Entity>);

#[async_trait]
impl CatalogApi for StaticCatalog {
    async fn get_entities(&self, _: EntitiesRequest) -> Result<EntitiesResponse, CatalogError> {
        Ok(EntitiesResponse {
            items: self.0.clone(),
        })
    }
}

/// Component whose source location points at `repo` in the org.
pub fn component(name: &str, repo: &str) -> Entity {
    serde_json::from_value(component_json(name, repo)).unwrap()
}

pub fn component_json(name: &str, repo: &str) -> Value {
    json!({
        "apiVersion": "backstage.io/v1alpha1",
        "kind": "Component",
        "metadata": {
            "name": name,
            "namespace": "default",
            "annotations": {
                "backstage.io/source-location": format!("url:https://github.com/{}/{}/tree/main/", ORG, repo)
            }
        },
        "spec": { "type": "service", "owner": "team", "lifecycle": "production" }
    })
}

/// Webhook resource as a previous run would have published it.
pub fn known_webhook(url: &str, dependency_of: &[&str]) -> Entity {
    let mut entity = materialize(url, &RepoStates::new(), &RepositoryIndex::default(), None);
    entity.set_dependency_of(dependency_of.iter().map(|s| s.to_string()).collect());
    entity
}

pub fn options(github: &MockServer) -> ProviderOptions {
    ProviderOptions {
        org: ORG.to_string(),
        identity_url: format!("https://github.com/{}", ORG),
        api_base_url: github.uri(),
        frequency_seconds: 3600,
        concurrency: 3,
        full_scan_max_pages: None,
    }
}

/// Connected provider over a static catalog and a memory connection.
pub async fn connected_provider(
    github: &MockServer,
    catalog: Vec<Entity>,
    credentials: Arc<CountingCredentials>,
) -> (Arc<WebhookProvider>, Arc<MemoryConnection>) {
    let provider = WebhookProvider::create(
        options(github),
        credentials,
        Arc::new(StaticCatalog(catalog)),
        Schedule::Manual,
    );
    let connection = Arc::new(MemoryConnection::new());
    provider.connect(connection.clone()).await.unwrap();
    (provider, connection)
}

/// Serve `repos` on page 1 of the org repository listing and an empty page 2.
pub async fn mount_repos(github: &MockServer, repos: &[&str]) {
    let body: Vec<Value> = repos.iter().map(|name| json!({ "name": name })).collect();
    Mock::given(method("GET"))
        .and(path(format!("/orgs/{}/repos", ORG)))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(github)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/orgs/{}/repos", ORG)))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(github)
        .await;
}

/// Serve `urls` as the hooks of `repo` on page 1 and an empty page 2.
pub async fn mount_hooks(github: &MockServer, repo: &str, urls: &[&str]) {
    let body: Vec<Value> = urls
        .iter()
        .enumerate()
        .map(|(id, url)| json!({ "id": id + 1, "active": true, "config": { "url": url } }))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/hooks", ORG, repo)))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(github)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/hooks", ORG, repo)))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(github)
        .await;
}

/// Audit-log entry in the shape GitHub returns with `include=web`.
#[allow(dead_code)]
pub fn audit_entry(action: &str, repo: &str, url: &str) -> Value {
    json!({
        "@timestamp": 1_760_000_000_000i64,
        "action": action,
        "actor": "octocat",
        "org": ORG,
        "repo": format!("{}/{}", ORG, repo),
        "config": { "url": url, "content_type": "json" }
    })
}
