//! Catalog source adapters.
//!
//! The pipeline reads items through the [`CatalogClient`] trait. The
//! production adapter, [`PokeApiCatalog`], walks the public berry listing
//! and treats each berry's `flavors` as its children.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::resilience::ResilienceGuard;
use crate::transport::HttpTransport;
use crate::types::{Document, ItemRef, Value};

/// Default catalog base URL.
pub const DEFAULT_CATALOG_URL: &str = "https://pokeapi.co/api/v2";

/// Read access to the upstream catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Lists every item reference.
    async fn list_items(&self) -> PipelineResult<Vec<ItemRef>>;

    /// Fetches an item's full detail document.
    async fn get_item_detail(&self, id: i64) -> PipelineResult<Document>;

    /// Extracts the child documents embedded in an already fetched detail.
    fn children_of(&self, detail: &Document) -> PipelineResult<Vec<Document>>;

    /// Fetches an item's detail and returns its child documents.
    async fn get_item_children(&self, id: i64) -> PipelineResult<Vec<Document>> {
        let detail = self.get_item_detail(id).await?;
        self.children_of(&detail)
    }
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: String,
    url: String,
}

/// Catalog client for the PokeAPI berry endpoints.
///
/// Every request runs through the supplied [`ResilienceGuard`].
pub struct PokeApiCatalog {
    transport: Arc<dyn HttpTransport>,
    guard: ResilienceGuard,
    base_url: String,
    max_pages: u32,
}

impl PokeApiCatalog {
    /// Creates a client for `base_url`, reading a single listing page.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        guard: ResilienceGuard,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            guard,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_pages: 1,
        }
    }

    /// Follows `next` links for up to `max_pages` listing pages.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn detail_url(&self, id: i64) -> String {
        format!("{}/berry/{}/", self.base_url, id)
    }

    async fn fetch_json<T>(&self, operation: &str, url: &str) -> PipelineResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.guard
            .execute(operation, || async {
                let response = self.transport.get(url).await?;
                response.json::<T>()
            })
            .await
    }
}

#[async_trait]
impl CatalogClient for PokeApiCatalog {
    async fn list_items(&self) -> PipelineResult<Vec<ItemRef>> {
        let mut items = Vec::new();
        let mut url = Some(format!("{}/berry/", self.base_url));
        let mut pages = 0;
        let mut skipped = 0_usize;

        while let Some(page_url) = url.take() {
            if pages >= self.max_pages {
                debug!(max_pages = self.max_pages, "Stopping at listing page bound");
                break;
            }
            let page: ListingPage = self.fetch_json("list_items", &page_url).await?;
            pages += 1;

            for entry in page.results {
                match ItemRef::from_resource(entry.name, entry.url) {
                    Ok(item) => items.push(item),
                    Err(err) => {
                        skipped += 1;
                        warn!(error = %err, "Skipping malformed listing entry");
                    }
                }
            }
            url = page.next;
        }

        info!(count = items.len(), skipped, pages, "Listed catalog items");
        Ok(items)
    }

    async fn get_item_detail(&self, id: i64) -> PipelineResult<Document> {
        let url = self.detail_url(id);
        let value: serde_json::Value = self.fetch_json("get_item_detail", &url).await?;
        Document::from_json(value)
    }

    fn children_of(&self, detail: &Document) -> PipelineResult<Vec<Document>> {
        let Some(flavors) = detail.get("flavors") else {
            return Ok(Vec::new());
        };
        let entries = flavors
            .as_array()
            .ok_or_else(|| PipelineError::invalid_field("flavors", "expected an array"))?;

        entries
            .iter()
            .map(|entry| match entry {
                Value::Document(child) => Ok(child.clone()),
                _ => Err(PipelineError::invalid_field("flavors", "expected objects")),
            })
            .collect()
    }
}
