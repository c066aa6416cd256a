//! In-process catalog connection that keeps the provider's current entity set.
//!
//! A `Full` mutation replaces the whole set; the connection computes the
//! explicit diff against the previous set so removals are never implicit.
//! Only the latest mutation and diff are kept.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    ConnectionError, DeferredEntity, Entity, EntityProviderConnection, EntityProviderMutation,
    RefreshOptions,
};

/// Outcome of applying a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationDiff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Default)]
struct State {
    entities: BTreeMap<String, DeferredEntity>,
    last_mutation: Option<EntityProviderMutation>,
    mutations: usize,
    last_diff: MutationDiff,
    last_refresh: Option<RefreshOptions>,
}

#[derive(Default)]
pub struct MemoryConnection {
    state: RwLock<State>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entity set ordered by entity ref.
    pub async fn entities(&self) -> Vec<Entity> {
        self.state
            .read()
            .await
            .entities
            .values()
            .map(|deferred| deferred.entity.clone())
            .collect()
    }

    /// Most recent mutation accepted; earlier payloads are not retained.
    pub async fn last_mutation(&self) -> Option<EntityProviderMutation> {
        self.state.read().await.last_mutation.clone()
    }

    /// Number of mutations accepted since creation.
    pub async fn mutation_count(&self) -> usize {
        self.state.read().await.mutations
    }

    pub async fn last_diff(&self) -> MutationDiff {
        self.state.read().await.last_diff.clone()
    }

    pub async fn last_refresh(&self) -> Option<RefreshOptions> {
        self.state.read().await.last_refresh.clone()
    }
}

fn diff_full(
    previous: &BTreeMap<String, DeferredEntity>,
    next: &BTreeMap<String, DeferredEntity>,
) -> MutationDiff {
    let mut diff = MutationDiff::default();
    for (key, entity) in next {
        match previous.get(key) {
            None => diff.added.push(key.clone()),
            Some(old) if old != entity => diff.updated.push(key.clone()),
            Some(_) => {}
        }
    }
    diff.removed = previous
        .keys()
        .filter(|key| !next.contains_key(*key))
        .cloned()
        .collect();
    diff
}

#[async_trait]
impl EntityProviderConnection for MemoryConnection {
    async fn apply_mutation(&self, mutation: EntityProviderMutation) -> Result<(), ConnectionError> {
        let mut state = self.state.write().await;

        let diff = match &mutation {
            EntityProviderMutation::Full { entities } => {
                let mut next = BTreeMap::new();
                for deferred in entities {
                    let key = deferred.entity.entity_ref();
                    if next.insert(key.clone(), deferred.clone()).is_some() {
                        return Err(ConnectionError::Rejected(format!(
                            "duplicate entity {} in full mutation",
                            key
                        )));
                    }
                }
                let diff = diff_full(&state.entities, &next);
                state.entities = next;
                diff
            }
            EntityProviderMutation::Delta { added, removed } => {
                let mut diff = MutationDiff::default();
                for deferred in removed {
                    let key = deferred.entity.entity_ref();
                    if state.entities.remove(&key).is_some() {
                        diff.removed.push(key);
                    }
                }
                for deferred in added {
                    let key = deferred.entity.entity_ref();
                    match state.entities.insert(key.clone(), deferred.clone()) {
                        None => diff.added.push(key),
                        Some(_) => diff.updated.push(key),
                    }
                }
                diff
            }
        };

        info!(
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            total = state.entities.len(),
            "Applied catalog mutation"
        );
        state.last_diff = diff;
        state.last_mutation = Some(mutation);
        state.mutations += 1;
        Ok(())
    }

    async fn refresh(&self, options: RefreshOptions) -> Result<(), ConnectionError> {
        debug!(keys = ?options.keys, "Refresh requested");
        self.state.write().await.last_refresh = Some(options);
        Ok(())
    }
}
