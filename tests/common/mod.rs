//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use integrations_catalog_pipeline::dlq::{DurableQueue, InMemoryQueue, LocalFallbackStore};
use integrations_catalog_pipeline::transport::ReqwestTransport;
use integrations_catalog_pipeline::{
    CatalogClient, CircuitBreaker, CircuitBreakerConfig, DeadLetterSink, Document, Entity,
    HttpProcessingClient, InMemoryCircuitStore, ItemRef, ItemRepository, PipelineError,
    PipelineResult, ResilienceGuard, RetryConfig, RetryExecutor, Value,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A berry detail document with two flavors.
pub fn berry(id: i64) -> Document {
    Document::from_json(json!({
        "id": id,
        "name": format!("berry-{}", id),
        "growth_time": 3,
        "max_harvest": 5,
        "natural_gift_power": 60,
        "size": 20,
        "smoothness": 25,
        "soil_dryness": 15,
        "flavors": [
            {"potency": 10, "flavor": {"name": "spicy"}},
            {"potency": 0, "flavor": {"name": "dry"}}
        ]
    }))
    .unwrap()
}

/// Catalog serving fixed detail documents.
pub struct StaticCatalog {
    details: BTreeMap<i64, Document>,
}

impl StaticCatalog {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            details: ids.into_iter().map(|id| (id, berry(id))).collect(),
        }
    }
}

#[async_trait]
impl CatalogClient for StaticCatalog {
    async fn list_items(&self) -> PipelineResult<Vec<ItemRef>> {
        Ok(self
            .details
            .keys()
            .map(|id| ItemRef {
                id: *id,
                name: format!("berry-{}", id),
                url: format!("https://catalog.test/berry/{}/", id),
            })
            .collect())
    }

    async fn get_item_detail(&self, id: i64) -> PipelineResult<Document> {
        self.details
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("berry", id.to_string()))
    }

    fn children_of(&self, detail: &Document) -> PipelineResult<Vec<Document>> {
        Ok(detail
            .get("flavors")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_document).cloned().collect())
            .unwrap_or_default())
    }
}

/// Repository that refuses or fails configured ids and records the rest.
#[derive(Default)]
pub struct ScriptedRepository {
    refused: HashSet<String>,
    failing: HashSet<String>,
    saved: Mutex<Vec<String>>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(mut self, id: &str) -> Self {
        self.refused.insert(id.to_string());
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn saved(&self) -> Vec<String> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl<T: Entity + 'static> ItemRepository<T> for ScriptedRepository {
    async fn save(&self, item: &T) -> PipelineResult<bool> {
        let id = item.id();
        if self.failing.contains(&id) {
            return Err(PipelineError::Repository {
                message: format!("connection reset while saving {}", id),
            });
        }
        if self.refused.contains(&id) {
            return Ok(false);
        }
        self.saved.lock().push(id);
        Ok(true)
    }
}

/// Guard with fast retries and a private breaker.
pub fn guard(service: &str, max_attempts: u32, failure_threshold: u64) -> ResilienceGuard {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        },
        Arc::new(InMemoryCircuitStore::new()),
    );
    ResilienceGuard::new(
        service,
        Arc::new(breaker),
        RetryExecutor::new(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::ZERO,
        }),
    )
}

/// Processing client, dead-letter queue and fallback directory wired together.
pub struct ProcessingFixture {
    pub client: Arc<HttpProcessingClient>,
    pub queue: Arc<InMemoryQueue>,
    pub sink: Arc<DeadLetterSink>,
    pub fallback_dir: TempDir,
}

impl ProcessingFixture {
    pub fn new(endpoint: String, visibility_timeout: Duration) -> Self {
        let fallback_dir = TempDir::new().unwrap();
        let queue = Arc::new(InMemoryQueue::new(visibility_timeout));
        let sink = Arc::new(DeadLetterSink::new(
            Some(queue.clone() as Arc<dyn DurableQueue>),
            LocalFallbackStore::new(fallback_dir.path()),
        ));
        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());
        let client = Arc::new(HttpProcessingClient::new(
            transport,
            guard("processing", 2, 100),
            endpoint,
            sink.clone(),
        ));
        Self {
            client,
            queue,
            sink,
            fallback_dir,
        }
    }
}

/// Ids of JSON bodies posted to a mock server.
pub async fn posted_ids(server: &wiremock::MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|request| serde_json::from_slice::<serde_json::Value>(&request.body).ok())
        .filter_map(|body| match body.get("id") {
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
