//! Catalog reads that also see the entities this process has published.
//!
//! The bundled `MemoryConnection` holds the provider's output in-process, so a
//! remote catalog never returns it. Wrapping the remote query lets the next run
//! find its own webhooks and switch to the audit log.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CatalogApi, CatalogError, EntitiesRequest, EntitiesResponse, MemoryConnection};

pub struct PublishedCatalog {
    remote: Arc<dyn CatalogApi>,
    published: Arc<MemoryConnection>,
}

impl PublishedCatalog {
    pub fn new(remote: Arc<dyn CatalogApi>, published: Arc<MemoryConnection>) -> Self {
        Self { remote, published }
    }
}

#[async_trait]
impl CatalogApi for PublishedCatalog {
    /// Remote entities first; published entities matching any filter group are
    /// appended unless the remote already returned the same ref.
    async fn get_entities(&self, request: EntitiesRequest) -> Result<EntitiesResponse, CatalogError> {
        let filter = request.filter.clone();
        let mut response = self.remote.get_entities(request).await?;

        let mut seen: HashSet<String> = response.items.iter().map(|e| e.entity_ref()).collect();
        let mut appended = 0usize;
        for entity in self.published.entities().await {
            let wanted = filter.is_empty() || filter.iter().any(|group| group.matches(&entity));
            if wanted && seen.insert(entity.entity_ref()) {
                response.items.push(entity);
                appended += 1;
            }
        }
        debug!(appended, "Merged published entities into catalog query");
        Ok(response)
    }
}
