//! Turns webhook observations into catalog `Resource` entities.

use std::collections::{BTreeMap, HashSet};

use md5::{Digest, Md5};
use serde_json::{Map, Value};

use super::index::{RepositoryIndex, WEBHOOK_SPEC_TYPE};
use super::{Changes, HookState, RepoStates};
use crate::catalog::{DEFAULT_NAMESPACE, Entity, EntityMetadata, RELATION_DEPENDENCY_OF};

pub const WEBHOOK_URL_ANNOTATION: &str = "moonlight.picpay/webhook-url";
pub const MANAGED_BY_LOCATION: &str = "picpay://github-webhook-provider";

const MANAGED_BY_ANNOTATIONS: [&str; 3] = [
    "backstage.io/managed-by-location",
    "backstage.io/managed-by-origin-location",
    "backstage.io/source-location",
];

/// Stable entity name for a delivery url: `webhook-` plus the md5 hex of the
/// url up to its first `?`.
pub fn webhook_name(url: &str) -> String {
    let base = url.split('?').next().unwrap_or(url);
    format!("webhook-{}", hex::encode(Md5::digest(base.as_bytes())))
}

fn webhook_entity(url: &str, dependency_of: Vec<String>) -> Entity {
    let mut annotations: BTreeMap<String, String> = MANAGED_BY_ANNOTATIONS
        .iter()
        .map(|key| (key.to_string(), MANAGED_BY_LOCATION.to_string()))
        .collect();
    annotations.insert(WEBHOOK_URL_ANNOTATION.to_string(), url.to_string());

    let mut spec = Map::new();
    spec.insert("type".to_string(), Value::from(WEBHOOK_SPEC_TYPE));
    spec.insert("owner".to_string(), Value::from("unknown"));
    spec.insert("lifecycle".to_string(), Value::from("production"));
    spec.insert(
        RELATION_DEPENDENCY_OF.to_string(),
        Value::Array(dependency_of.into_iter().map(Value::String).collect()),
    );

    Entity {
        api_version: "backstage.io/v1alpha1".to_string(),
        kind: "Resource".to_string(),
        metadata: EntityMetadata {
            name: webhook_name(url),
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            description: Some(format!("Webhook for {}", url)),
            annotations,
            extra: Map::new(),
        },
        spec,
        relations: Vec::new(),
    }
}

/// Apply per-repository states to an existing webhook's `spec.dependencyOf`:
/// `Added` appends refs not yet present, `Removed` drops them. Repositories the
/// index knows nothing about leave the entity untouched.
pub fn merge_dependencies(entity: &mut Entity, repos: &RepoStates, index: &RepositoryIndex) {
    for (repo, state) in repos {
        let refs = index.refs(repo);
        if refs.is_empty() {
            continue;
        }
        let mut dependencies = entity.dependency_of();
        for entity_ref in refs {
            match state {
                HookState::Added => {
                    if !dependencies.contains(&entity_ref) {
                        dependencies.push(entity_ref);
                    }
                }
                HookState::Removed => dependencies.retain(|existing| *existing != entity_ref),
            }
        }
        entity.set_dependency_of(dependencies);
    }
}

/// Build the entity for one url. With an `existing` entity its dependencies
/// are merged; otherwise they are the refs of every repository not marked
/// `Removed`, in repository order.
pub fn materialize(
    url: &str,
    repos: &RepoStates,
    index: &RepositoryIndex,
    existing: Option<Entity>,
) -> Entity {
    match existing {
        Some(mut entity) => {
            merge_dependencies(&mut entity, repos, index);
            entity
        }
        None => {
            let dependency_of = repos
                .iter()
                .filter(|(_, state)| **state != HookState::Removed)
                .flat_map(|(repo, _)| index.refs(repo))
                .collect();
            webhook_entity(url, dependency_of)
        }
    }
}

/// Materialize every url in `changes` that does not collide by name with an
/// entity in `known` or with one produced earlier in this call.
pub fn materialize_changes(
    changes: &Changes,
    index: &RepositoryIndex,
    known: &[Entity],
) -> Vec<Entity> {
    let mut seen: HashSet<String> = known
        .iter()
        .map(|entity| entity.metadata.name.clone())
        .collect();
    let mut created = Vec::new();
    for (url, repos) in changes {
        if !seen.insert(webhook_name(url)) {
            continue;
        }
        created.push(materialize(url, repos, index, None));
    }
    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> RepositoryIndex {
        let component = |name: &str, repo: &str| -> Entity {
            serde_json::from_value(json!({
                "apiVersion": "backstage.io/v1alpha1",
                "kind": "Component",
                "metadata": {
                    "name": name,
                    "annotations": {
                        "backstage.io/source-location": format!("url:https://github.com/PicPay/{}/tree/main/", repo)
                    }
                }
            }))
            .unwrap()
        };
        let entities = vec![
            component("x", "x"),
            component("y", "y"),
            component("y-worker", "y"),
        ];
        RepositoryIndex::build(&entities)
    }

    fn states(pairs: &[(&str, HookState)]) -> RepoStates {
        pairs
            .iter()
            .map(|(repo, state)| (repo.to_string(), *state))
            .collect()
    }

    #[test]
    fn name_ignores_query_string() {
        let plain = webhook_name("https://hooks.example.com/notify");
        assert_eq!(plain, webhook_name("https://hooks.example.com/notify?token=abc"));
        assert_eq!(plain, webhook_name("https://hooks.example.com/notify?a=1?b=2"));
        assert_eq!(plain, "webhook-".to_string() + &hex::encode(Md5::digest(b"https://hooks.example.com/notify")));
        assert_ne!(plain, webhook_name("https://hooks.example.com/other"));
    }

    #[test]
    fn new_entity_has_fixed_shape() {
        let entity = materialize(
            "https://u.example.com/hook?x=1",
            &states(&[("x", HookState::Added)]),
            &index(),
            None,
        );

        assert_eq!(entity.kind, "Resource");
        assert_eq!(entity.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(
            entity.metadata.description.as_deref(),
            Some("Webhook for https://u.example.com/hook?x=1")
        );
        assert_eq!(
            entity.annotation(WEBHOOK_URL_ANNOTATION),
            Some("https://u.example.com/hook?x=1")
        );
        for key in MANAGED_BY_ANNOTATIONS {
            assert_eq!(entity.annotation(key), Some(MANAGED_BY_LOCATION));
        }
        assert_eq!(entity.spec_type(), Some("webhook"));
        assert_eq!(entity.spec["owner"], json!("unknown"));
        assert_eq!(entity.spec["lifecycle"], json!("production"));
        assert_eq!(entity.dependency_of(), vec!["component:default/x"]);
    }

    #[test]
    fn new_entity_skips_removed_and_unknown_repos() {
        let entity = materialize(
            "https://u",
            &states(&[
                ("unknown", HookState::Added),
                ("x", HookState::Removed),
                ("y", HookState::Added),
            ]),
            &index(),
            None,
        );
        assert_eq!(
            entity.dependency_of(),
            vec!["component:default/y", "component:default/y-worker"]
        );
    }

    #[test]
    fn merge_adds_missing_and_removes_destroyed() {
        let mut existing = materialize("https://u", &states(&[("y", HookState::Added)]), &index(), None);
        merge_dependencies(
            &mut existing,
            &states(&[("x", HookState::Added), ("y", HookState::Removed)]),
            &index(),
        );
        assert_eq!(existing.dependency_of(), vec!["component:default/x"]);

        merge_dependencies(&mut existing, &states(&[("x", HookState::Added)]), &index());
        assert_eq!(existing.dependency_of(), vec!["component:default/x"]);
    }

    #[test]
    fn merge_with_unindexed_repo_leaves_spec_untouched() {
        let mut existing = materialize("https://u", &RepoStates::new(), &index(), None);
        existing.spec.remove(RELATION_DEPENDENCY_OF);
        let before = existing.clone();
        merge_dependencies(&mut existing, &states(&[("nowhere", HookState::Added)]), &index());
        assert_eq!(existing, before);
    }

    #[test]
    fn first_seen_name_wins() {
        let mut changes = Changes::new();
        changes.insert("https://u?a=1".to_string(), states(&[("x", HookState::Added)]));
        changes.insert("https://u?b=2".to_string(), states(&[("y", HookState::Added)]));
        changes.insert("https://v".to_string(), states(&[("y", HookState::Added)]));

        let known = vec![materialize("https://v", &RepoStates::new(), &index(), None)];
        let created = materialize_changes(&changes, &index(), &known);

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].annotation(WEBHOOK_URL_ANNOTATION), Some("https://u?a=1"));
        assert_eq!(created[0].dependency_of(), vec!["component:default/x"]);
    }
}
