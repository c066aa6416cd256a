//! HTTP client for the catalog's entity listing endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use super::{CatalogApi, CatalogError, EntitiesRequest, EntitiesResponse, Entity};

/// Reads entities from `GET {base}/api/catalog/entities`.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

/// The listing endpoint answers with a bare array; newer deployments wrap it.
#[derive(Deserialize)]
#[serde(untagged)]
enum EntitiesBody {
    Items { items: Vec<Entity> },
    List(Vec<Entity>),
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn entities_url(&self, request: &EntitiesRequest) -> Result<Url, CatalogError> {
        let mut url = Url::parse(&format!("{}/api/catalog/entities", self.base_url))?;
        {
            let mut pairs = url.query_pairs_mut();
            for filter in &request.filter {
                pairs.append_pair("filter", &filter.to_query_value());
            }
            if !request.fields.is_empty() {
                pairs.append_pair("fields", &request.fields.join(","));
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn get_entities(&self, request: EntitiesRequest) -> Result<EntitiesResponse, CatalogError> {
        let url = self.entities_url(&request)?;
        debug!(%url, "Querying catalog entities");

        let mut builder = self.http.get(url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            error!(status, "Catalog entity query failed");
            return Err(CatalogError::Api { status, message });
        }

        let items = match response.json::<EntitiesBody>().await? {
            EntitiesBody::Items { items } => items,
            EntitiesBody::List(items) => items,
        };
        Ok(EntitiesResponse { items })
    }
}
