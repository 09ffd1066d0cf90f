//! Dead-letter handling for items that exhausted their retries.
//!
//! [`DeadLetterSink`] writes to a [`DurableQueue`] and falls back to a
//! [`LocalFallbackStore`] directory when the queue is missing or failing.

mod fallback;
mod queue;
mod sqs;

pub use fallback::LocalFallbackStore;
pub use queue::{DurableQueue, InMemoryQueue, ReceivedMessage};
pub use sqs::{SqsConfig, SqsQueue};
pub(crate) use sqs::MAX_WAIT_SECONDS;

#[cfg(test)]
pub use queue::MockDurableQueue;

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::errors::{ErrorKind, PipelineResult};
use crate::observability::{DeadLetterOutcome, MetricsCollector, NoopMetricsCollector};
use crate::types::{DlqMessage, Document, ItemType};

/// Records failed items so they can be replayed later.
///
/// An item always reaches the queue or the fallback directory, or
/// [`add_failed_item`](Self::add_failed_item) returns `false` after logging
/// a storage failure.
pub struct DeadLetterSink {
    queue: Option<Arc<dyn DurableQueue>>,
    fallback: LocalFallbackStore,
    source: String,
    metrics: Arc<dyn MetricsCollector>,
}

impl DeadLetterSink {
    /// Creates a sink. Without a queue every item goes to the fallback store.
    pub fn new(queue: Option<Arc<dyn DurableQueue>>, fallback: LocalFallbackStore) -> Self {
        Self {
            queue,
            fallback,
            source: "pipeline".to_string(),
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Sets the source name stamped on every message.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the metrics collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the fallback store.
    pub fn fallback(&self) -> &LocalFallbackStore {
        &self.fallback
    }

    /// Records a failed item. Returns whether it was stored anywhere.
    pub async fn add_failed_item(&self, item_type: ItemType, payload: &Document) -> bool {
        let message = DlqMessage::new(item_type, payload.clone(), self.source.as_str());
        let item_id = message.item_id();

        if let Some(queue) = &self.queue {
            match serde_json::to_string(&message) {
                Ok(body) => match queue.send(body).await {
                    Ok(()) => {
                        info!(item_type = %item_type, item_id = %item_id, "Added item to DLQ");
                        self.metrics.record_dead_letter(DeadLetterOutcome::Queued);
                        return true;
                    }
                    Err(err) => {
                        warn!(item_type = %item_type, item_id = %item_id, error = %err, "DLQ send failed, using local fallback");
                    }
                },
                Err(err) => {
                    warn!(item_type = %item_type, item_id = %item_id, error = %err, "Could not encode DLQ message, using local fallback");
                }
            }
        }

        match self.fallback.write(&message).await {
            Ok(path) => {
                warn!(item_type = %item_type, item_id = %item_id, path = %path.display(), "Stored item in DLQ fallback");
                self.metrics.record_dead_letter(DeadLetterOutcome::Fallback);
                true
            }
            Err(err) => {
                error!(
                    item_type = %item_type,
                    item_id = %item_id,
                    kind = ErrorKind::Storage.as_str(),
                    error = %err,
                    "Failed to store item in DLQ or fallback"
                );
                self.metrics.record_dead_letter(DeadLetterOutcome::Lost);
                false
            }
        }
    }

    /// Returns every message in the fallback directory, oldest first.
    pub async fn get_fallback_items(&self) -> PipelineResult<Vec<DlqMessage>> {
        Ok(self
            .fallback
            .list()
            .await?
            .into_iter()
            .map(|(_, message)| message)
            .collect())
    }

    /// Moves fallback files onto the durable queue, oldest first.
    ///
    /// Each file is claimed before its message is sent, so a file whose
    /// removal fails is never sent twice. Stops at the first claim or send
    /// failure and returns how many were moved.
    pub async fn restore_fallback_items(&self) -> PipelineResult<usize> {
        let Some(queue) = &self.queue else {
            return Ok(0);
        };

        let mut restored = 0;
        for (path, message) in self.fallback.list().await? {
            let body = serde_json::to_string(&message)?;
            let claimed = match self.fallback.claim(&path).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    error!(path = %path.display(), error = %err, "Stopping fallback restore");
                    break;
                }
            };

            if let Err(err) = queue.send(body).await {
                warn!(path = %path.display(), error = %err, "Stopping fallback restore");
                if let Err(err) = self.fallback.release(&claimed, &path).await {
                    error!(path = %claimed.display(), error = %err, "Failed to release fallback file");
                }
                break;
            }
            restored += 1;

            if let Err(err) = self.fallback.remove(&claimed).await {
                error!(
                    path = %claimed.display(),
                    error = %err,
                    "Failed to remove restored fallback file, left hidden"
                );
            }
        }

        if restored > 0 {
            info!(restored, "Restored fallback items to DLQ");
        }
        Ok(restored)
    }
}
