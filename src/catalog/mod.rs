//! # Catalog Model
//!
//! Entity types exchanged with the software catalog, the query interface used
//! to read known entities, and the connection interface used to publish the
//! provider's entity set.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod client;
pub mod connection;
pub mod published;

pub use client::CatalogClient;
pub use connection::MemoryConnection;
pub use published::PublishedCatalog;

/// Namespace assumed when an entity omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Annotation pointing at the repository an entity was sourced from.
pub const SOURCE_LOCATION_ANNOTATION: &str = "backstage.io/source-location";

/// Spec field holding the refs of entities that depend on a resource.
pub const RELATION_DEPENDENCY_OF: &str = "dependencyOf";

/// A catalog entity in the `backstage.io/v1alpha1` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub api_version: String,
    pub kind: String,
    pub metadata: EntityMetadata,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub spec: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<EntityRelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Fields this provider does not interpret (uid, etag, labels, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelation {
    #[serde(rename = "type")]
    pub relation_type: String,
    pub target_ref: String,
}

impl Entity {
    /// Stringified reference in the `kind:namespace/name` form.
    pub fn entity_ref(&self) -> String {
        stringify_entity_ref(
            &self.kind,
            self.metadata.namespace.as_deref(),
            &self.metadata.name,
        )
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// `spec.type`, when present as a string.
    pub fn spec_type(&self) -> Option<&str> {
        self.spec.get("type").and_then(Value::as_str)
    }

    /// Entity refs listed under `spec.dependencyOf`; non-string items are ignored.
    pub fn dependency_of(&self) -> Vec<String> {
        self.spec
            .get(RELATION_DEPENDENCY_OF)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_dependency_of(&mut self, refs: Vec<String>) {
        self.spec.insert(
            RELATION_DEPENDENCY_OF.to_string(),
            Value::Array(refs.into_iter().map(Value::String).collect()),
        );
    }
}

/// Formats an entity reference the way the catalog does: kind and namespace
/// are lowercased, the name is kept verbatim.
pub fn stringify_entity_ref(kind: &str, namespace: Option<&str>, name: &str) -> String {
    format!(
        "{}:{}/{}",
        kind.to_lowercase(),
        namespace.unwrap_or(DEFAULT_NAMESPACE).to_lowercase(),
        name
    )
}

/// One filter group; all pairs in a group must match. Groups are OR-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter(pub Vec<(String, String)>);

impl EntityFilter {
    pub fn kind(kind: &str) -> Self {
        Self(vec![("kind".to_string(), kind.to_string())])
    }

    pub fn and(mut self, key: &str, value: &str) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    /// Whether `entity` satisfies every pair. Supports `kind` (case-insensitive)
    /// and string fields under `spec.` or `metadata.`; other keys never match.
    pub fn matches(&self, entity: &Entity) -> bool {
        self.0.iter().all(|(key, value)| {
            if key == "kind" {
                return entity.kind.eq_ignore_ascii_case(value);
            }
            if let Some(field) = key.strip_prefix("spec.") {
                return entity.spec.get(field).and_then(Value::as_str) == Some(value.as_str());
            }
            match key.strip_prefix("metadata.") {
                Some("name") => entity.metadata.name == *value,
                Some("namespace") => {
                    entity.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE) == value
                }
                Some(field) => {
                    entity.metadata.extra.get(field).and_then(Value::as_str)
                        == Some(value.as_str())
                }
                None => false,
            }
        })
    }

    /// Query-string form, e.g. `kind=Resource,spec.type=webhook`.
    pub fn to_query_value(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntitiesRequest {
    pub filter: Vec<EntityFilter>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitiesResponse {
    pub items: Vec<Entity>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error talking to catalog: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid catalog url: {0}")]
    Url(#[from] url::ParseError),
}

/// Read side of the catalog.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_entities(&self, request: EntitiesRequest) -> Result<EntitiesResponse, CatalogError>;
}

/// An entity emitted by a provider together with the location that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredEntity {
    pub entity: Entity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_key: Option<String>,
}

/// Mutations a provider can apply to its slice of the catalog.
///
/// `Full` declares the complete entity set owned by the provider: anything the
/// provider emitted before and is absent now must be removed by the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityProviderMutation {
    Full {
        entities: Vec<DeferredEntity>,
    },
    Delta {
        added: Vec<DeferredEntity>,
        removed: Vec<DeferredEntity>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    pub keys: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("catalog connection rejected mutation: {0}")]
    Rejected(String),
}

/// Write side of the catalog, handed to the provider on `connect`.
#[async_trait]
pub trait EntityProviderConnection: Send + Sync {
    async fn apply_mutation(&self, mutation: EntityProviderMutation) -> Result<(), ConnectionError>;

    async fn refresh(&self, options: RefreshOptions) -> Result<(), ConnectionError>;
}
