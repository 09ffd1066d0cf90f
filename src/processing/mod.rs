//! Downstream processing service client.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::dlq::DeadLetterSink;
use crate::errors::{PipelineError, PipelineResult};
use crate::resilience::ResilienceGuard;
use crate::transport::{HttpTransport, Method};
use crate::types::{Document, ItemType};

/// Default processing endpoint.
pub const DEFAULT_PROCESSING_ENDPOINT: &str = "https://httpbin.org/post";

/// Submits items to the downstream processor.
#[async_trait]
pub trait ProcessingClient: Send + Sync {
    /// Submits an item from the pipeline.
    ///
    /// On failure the item is dead-lettered and `Ok(None)` is returned. An
    /// error means the item could not be dead-lettered either.
    async fn submit(
        &self,
        item_type: ItemType,
        document: &Document,
    ) -> PipelineResult<Option<Document>>;

    /// Replays a dead-lettered item. Failures are returned, never dead-lettered.
    async fn replay(&self, item_type: ItemType, document: &Document) -> PipelineResult<Document>;
}

/// Posts items as JSON to an HTTP endpoint.
pub struct HttpProcessingClient {
    transport: Arc<dyn HttpTransport>,
    guard: ResilienceGuard,
    endpoint: String,
    sink: Arc<DeadLetterSink>,
}

impl HttpProcessingClient {
    /// Creates a client posting to `endpoint`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        guard: ResilienceGuard,
        endpoint: impl Into<String>,
        sink: Arc<DeadLetterSink>,
    ) -> Self {
        Self {
            transport,
            guard,
            endpoint: endpoint.into(),
            sink,
        }
    }

    /// Returns the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, item_type: ItemType, document: &Document) -> PipelineResult<Document> {
        let operation = format!("process_{}", item_type);
        self.guard
            .execute(&operation, || async {
                let response = self
                    .transport
                    .send_json(Method::Post, &self.endpoint, document)
                    .await?;
                if response.body.is_empty() {
                    return Ok(Document::new());
                }
                Document::from_json(response.json()?)
            })
            .await
    }
}

#[async_trait]
impl ProcessingClient for HttpProcessingClient {
    async fn submit(
        &self,
        item_type: ItemType,
        document: &Document,
    ) -> PipelineResult<Option<Document>> {
        let item_id = document.id_string().unwrap_or_else(|| "unknown".to_string());

        match self.post(item_type, document).await {
            Ok(result) => {
                debug!(item_type = %item_type, item_id = %item_id, "Processed item");
                Ok(Some(result))
            }
            Err(err) => {
                warn!(
                    item_type = %item_type,
                    item_id = %item_id,
                    kind = err.kind_name(),
                    error = %err,
                    "Processing failed, dead-lettering item"
                );
                if self.sink.add_failed_item(item_type, document).await {
                    Ok(None)
                } else {
                    error!(item_type = %item_type, item_id = %item_id, "Item lost: dead-letter storage failed");
                    Err(PipelineError::DeadLetterStorage {
                        message: format!("{} {} could not be dead-lettered: {}", item_type, item_id, err),
                    })
                }
            }
        }
    }

    async fn replay(&self, item_type: ItemType, document: &Document) -> PipelineResult<Document> {
        self.post(item_type, document).await
    }
}
