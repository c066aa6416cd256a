//! Repository index and the previously known webhook set, read from the catalog.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::catalog::{
    CatalogApi, CatalogError, EntitiesRequest, Entity, EntityFilter, SOURCE_LOCATION_ANNOTATION,
};

/// `spec.type` of the resources this provider emits.
pub const WEBHOOK_SPEC_TYPE: &str = "webhook";

static REPO_PATTERN: OnceLock<Regex> = OnceLock::new();

fn repo_pattern() -> &'static Regex {
    REPO_PATTERN.get_or_init(|| {
        Regex::new(r"github\.com/[^/]+/([^/]+)").expect("repository pattern is valid")
    })
}

/// Repository short name captured from a source-location annotation.
pub fn repo_from_source_location(location: &str) -> Option<&str> {
    repo_pattern()
        .captures(location)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Repository short name to the catalog entities sourced from it.
#[derive(Debug, Clone, Default)]
pub struct RepositoryIndex {
    by_repo: HashMap<String, Vec<Entity>>,
}

impl RepositoryIndex {
    /// Index every non-`Resource` entity whose source location points at a
    /// GitHub repository. Entities are kept in catalog order within a bucket.
    pub fn build<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> Self {
        let mut by_repo: HashMap<String, Vec<Entity>> = HashMap::new();
        for entity in entities {
            if entity.kind == "Resource" {
                continue;
            }
            if let Some(location) = entity.annotation(SOURCE_LOCATION_ANNOTATION)
                && let Some(repo) = repo_from_source_location(location)
            {
                by_repo
                    .entry(repo.to_string())
                    .or_default()
                    .push(entity.clone());
            }
        }
        Self { by_repo }
    }

    pub fn entities(&self, repo: &str) -> &[Entity] {
        self.by_repo.get(repo).map(Vec::as_slice).unwrap_or_default()
    }

    /// Entity refs for a repository, empty when nothing in the catalog points at it.
    pub fn refs(&self, repo: &str) -> Vec<String> {
        self.entities(repo).iter().map(Entity::entity_ref).collect()
    }

    pub fn repo_count(&self) -> usize {
        self.by_repo.len()
    }
}

/// Everything a run needs from the catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub index: RepositoryIndex,
    /// `Resource` entities with `spec.type = webhook`, in catalog order.
    pub known_webhooks: Vec<Entity>,
}

impl CatalogSnapshot {
    pub fn from_entities(entities: &[Entity]) -> Self {
        let known_webhooks = entities
            .iter()
            .filter(|entity| {
                entity.kind == "Resource"
                    && entity.spec_type() == Some(WEBHOOK_SPEC_TYPE)
            })
            .cloned()
            .collect();
        Self {
            index: RepositoryIndex::build(entities),
            known_webhooks,
        }
    }
}

fn snapshot_request() -> EntitiesRequest {
    EntitiesRequest {
        filter: vec![
            EntityFilter::kind("Component"),
            EntityFilter::kind("System"),
            EntityFilter::kind("Template"),
            EntityFilter::kind("Resource").and("spec.type", WEBHOOK_SPEC_TYPE),
        ],
        fields: ["metadata", "kind", "apiVersion", "spec", "relations"]
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

/// Query the catalog once and split the result into the index and the known webhooks.
pub async fn load_snapshot(catalog: &dyn CatalogApi) -> Result<CatalogSnapshot, CatalogError> {
    let response = catalog.get_entities(snapshot_request()).await?;
    let snapshot = CatalogSnapshot::from_entities(&response.items);
    debug!(
        entities = response.items.len(),
        repositories = snapshot.index.repo_count(),
        known_webhooks = snapshot.known_webhooks.len(),
        "Loaded catalog snapshot"
    );
    Ok(snapshot)
}
