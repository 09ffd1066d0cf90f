//! Dead-letter queue consumer.
//!
//! The [`Reprocessor`] alternates between polling the durable queue and
//! draining the batch it received. Every message is replayed through the
//! processing client and deleted only once the replay succeeds; anything
//! else is left for the queue to redeliver after its visibility timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::dlq::{DeadLetterSink, DurableQueue, ReceivedMessage};
use crate::errors::PipelineResult;
use crate::observability::{MetricsCollector, NoopMetricsCollector};
use crate::processing::ProcessingClient;
use crate::search::SearchIndexer;
use crate::types::{DlqMessage, ItemType};

/// Polling settings.
#[derive(Debug, Clone)]
pub struct ReprocessorConfig {
    /// Messages requested per poll.
    pub batch_size: u32,
    /// Long-poll wait for each receive.
    pub wait_time: Duration,
    /// Pause after an empty poll.
    pub idle_delay: Duration,
}

impl Default for ReprocessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_time: Duration::from_secs(10),
            idle_delay: Duration::from_secs(20),
        }
    }
}

/// What the consumer is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessorState {
    /// Waiting on a receive.
    Polling,
    /// Draining a received batch.
    Processing,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages received.
    pub received: usize,
    /// Messages replayed and deleted.
    pub replayed: usize,
    /// Messages whose replay or delete failed.
    pub failed: usize,
    /// Messages that could not be decoded.
    pub malformed: usize,
}

impl BatchOutcome {
    /// True when the poll returned nothing.
    pub fn is_empty(&self) -> bool {
        self.received == 0
    }
}

enum MessageOutcome {
    Replayed,
    Failed,
    Malformed,
}

/// Replays dead-lettered items from a durable queue.
pub struct Reprocessor {
    queue: Arc<dyn DurableQueue>,
    processing: Arc<dyn ProcessingClient>,
    indexer: Option<Arc<dyn SearchIndexer>>,
    sink: Option<Arc<DeadLetterSink>>,
    config: ReprocessorConfig,
    metrics: Arc<dyn MetricsCollector>,
    state: watch::Sender<ReprocessorState>,
}

impl Reprocessor {
    /// Creates a reprocessor reading `queue`.
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        processing: Arc<dyn ProcessingClient>,
        config: ReprocessorConfig,
    ) -> Self {
        let (state, _) = watch::channel(ReprocessorState::Polling);
        Self {
            queue,
            processing,
            indexer: None,
            sink: None,
            config,
            metrics: Arc::new(NoopMetricsCollector),
            state,
        }
    }

    /// Reindexes successfully replayed posts.
    #[must_use]
    pub fn with_indexer(mut self, indexer: Arc<dyn SearchIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Restores the sink's fallback files to the queue on idle polls.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<DeadLetterSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the metrics collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReprocessorConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> ReprocessorState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ReprocessorState> {
        self.state.subscribe()
    }

    /// Receives one batch and replays every message in it.
    pub async fn poll_once(&self) -> PipelineResult<BatchOutcome> {
        self.state.send_replace(ReprocessorState::Polling);
        let messages = self
            .queue
            .receive(self.config.batch_size, self.config.wait_time)
            .await?;

        let mut outcome = BatchOutcome {
            received: messages.len(),
            ..BatchOutcome::default()
        };
        if messages.is_empty() {
            return Ok(outcome);
        }

        self.state.send_replace(ReprocessorState::Processing);
        debug!(count = messages.len(), "Processing DLQ batch");
        for message in &messages {
            match self.handle(message).await {
                MessageOutcome::Replayed => outcome.replayed += 1,
                MessageOutcome::Failed => outcome.failed += 1,
                MessageOutcome::Malformed => outcome.malformed += 1,
            }
        }
        self.state.send_replace(ReprocessorState::Polling);

        info!(
            received = outcome.received,
            replayed = outcome.replayed,
            failed = outcome.failed,
            malformed = outcome.malformed,
            "DLQ batch done"
        );
        Ok(outcome)
    }

    /// Polls until `shutdown` turns true or its sender is dropped.
    ///
    /// Shutdown is observed between polls and during the idle pause, never
    /// while a batch is being drained.
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            wait_time_secs = self.config.wait_time.as_secs(),
            "DLQ reprocessor started"
        );

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(outcome) => outcome.is_empty(),
                Err(err) => {
                    error!(kind = err.kind_name(), error = %err, "DLQ receive failed");
                    true
                }
            };

            if idle {
                self.restore_fallback().await;
                debug!(delay_secs = self.config.idle_delay.as_secs(), "DLQ idle, waiting");
                tokio::select! {
                    () = tokio::time::sleep(self.config.idle_delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("DLQ reprocessor stopped");
    }

    async fn restore_fallback(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(err) = sink.restore_fallback_items().await {
            warn!(error = %err, "Could not restore fallback items");
        }
    }

    async fn handle(&self, received: &ReceivedMessage) -> MessageOutcome {
        let mut message: DlqMessage = match serde_json::from_str(&received.body) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    receive_count = received.receive_count,
                    error = %err,
                    "Skipping malformed DLQ message"
                );
                return MessageOutcome::Malformed;
            }
        };
        message.retry_count = message.retry_count.max(received.receive_count);

        let item_type = message.item_type;
        let item_id = message.item_id();
        info!(
            item_type = %item_type,
            item_id = %item_id,
            retry_count = message.retry_count,
            "Reprocessing item"
        );

        if let Err(err) = self.processing.replay(item_type, &message.payload).await {
            warn!(
                item_type = %item_type,
                item_id = %item_id,
                retry_count = message.retry_count,
                kind = err.kind_name(),
                error = %err,
                "Replay failed, leaving message for redelivery"
            );
            self.metrics.record_replay(item_type, message.retry_count, false);
            return MessageOutcome::Failed;
        }
        self.metrics.record_replay(item_type, message.retry_count, true);

        if item_type == ItemType::Post {
            if let Some(indexer) = &self.indexer {
                if let Err(err) = indexer.index(&item_id, &message.payload).await {
                    warn!(item_id = %item_id, error = %err, "Reindexing replayed post failed");
                }
            }
        }

        match self.queue.delete(&received.handle).await {
            Ok(()) => {
                info!(item_type = %item_type, item_id = %item_id, "Replayed and removed from DLQ");
                MessageOutcome::Replayed
            }
            Err(err) => {
                error!(item_type = %item_type, item_id = %item_id, error = %err, "Failed to delete DLQ message");
                MessageOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::{InMemoryQueue, LocalFallbackStore};
    use crate::mocks::{FailingQueue, MockProcessingClient, MockResponse, MockTransport};
    use crate::observability::DefaultMetricsCollector;
    use crate::search::OpenSearchIndexer;
    use crate::transport::Method;
    use crate::types::Document;
    use tempfile::TempDir;

    fn config() -> ReprocessorConfig {
        ReprocessorConfig {
            batch_size: 10,
            wait_time: Duration::ZERO,
            idle_delay: Duration::from_secs(20),
        }
    }

    async fn enqueue(queue: &InMemoryQueue, item_type: ItemType, id: i64) {
        let message = DlqMessage::new(item_type, Document::new().with("id", id), "pipeline");
        queue
            .send(serde_json::to_string(&message).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_successful_replay_deletes_message() {
        let queue = Arc::new(InMemoryQueue::default());
        enqueue(&queue, ItemType::Post, 1).await;
        let processing = Arc::new(MockProcessingClient::new());

        let reprocessor = Reprocessor::new(queue.clone(), processing.clone(), config());
        let outcome = reprocessor.poll_once().await.unwrap();

        assert_eq!(outcome.replayed, 1);
        assert!(queue.is_empty());
        assert_eq!(processing.replayed(), vec![(ItemType::Post, "1".to_string())]);
        assert_eq!(reprocessor.state(), ReprocessorState::Polling);
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_message_and_others_proceed() {
        let queue = Arc::new(InMemoryQueue::default());
        enqueue(&queue, ItemType::Post, 1).await;
        enqueue(&queue, ItemType::Comment, 2).await;
        let processing = Arc::new(MockProcessingClient::new().with_failing_replay("1"));

        let reprocessor = Reprocessor::new(queue.clone(), processing, config());
        let outcome = reprocessor.poll_once().await.unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.replayed, 1);
        assert_eq!(queue.len(), 1);
        let remaining: DlqMessage = serde_json::from_str(&queue.bodies()[0]).unwrap();
        assert_eq!(remaining.item_id(), "1");
    }

    #[tokio::test]
    async fn test_retry_count_tracks_redeliveries() {
        let queue = Arc::new(InMemoryQueue::new(Duration::ZERO));
        enqueue(&queue, ItemType::Post, 1).await;
        let processing = Arc::new(MockProcessingClient::new().with_failing_replay("1"));
        let metrics = Arc::new(DefaultMetricsCollector::new());

        let reprocessor = Reprocessor::new(queue.clone(), processing.clone(), config())
            .with_metrics(metrics.clone());
        for _ in 0..3 {
            let outcome = reprocessor.poll_once().await.unwrap();
            assert_eq!(outcome.failed, 1);
        }

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.replays_failed, 3);
        assert_eq!(snapshot.max_replay_retry_count, 3);
        assert_eq!(processing.replayed().len(), 3);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_stored_retry_count_is_never_lowered() {
        let queue = Arc::new(InMemoryQueue::default());
        let mut message = DlqMessage::new(ItemType::Post, Document::new().with("id", 1), "pipeline");
        message.retry_count = 7;
        queue.send(serde_json::to_string(&message).unwrap()).await.unwrap();
        let metrics = Arc::new(DefaultMetricsCollector::new());

        let reprocessor = Reprocessor::new(queue, Arc::new(MockProcessingClient::new()), config())
            .with_metrics(metrics.clone());
        reprocessor.poll_once().await.unwrap();

        assert_eq!(metrics.get_metrics().max_replay_retry_count, 7);
    }

    #[tokio::test]
    async fn test_malformed_message_is_left_in_place() {
        let queue = Arc::new(InMemoryQueue::default());
        queue.send("{not json".to_string()).await.unwrap();

        let reprocessor = Reprocessor::new(queue.clone(), Arc::new(MockProcessingClient::new()), config());
        let outcome = reprocessor.poll_once().await.unwrap();

        assert_eq!(outcome.malformed, 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_replayed_posts_are_reindexed() {
        let queue = Arc::new(InMemoryQueue::default());
        enqueue(&queue, ItemType::Post, 4).await;
        enqueue(&queue, ItemType::Comment, 5).await;
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_response(MockResponse::json(serde_json::json!({"result": "created"})));

        let reprocessor = Reprocessor::new(queue.clone(), Arc::new(MockProcessingClient::new()), config())
            .with_indexer(Arc::new(OpenSearchIndexer::new(transport.clone(), "http://search:9200")));
        reprocessor.poll_once().await.unwrap();

        assert_eq!(transport.request_count(), 1);
        let request = transport.last_request().unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.url, "http://search:9200/posts/_doc/4");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_index_failure_does_not_block_delete() {
        let queue = Arc::new(InMemoryQueue::default());
        enqueue(&queue, ItemType::Post, 4).await;
        let transport = Arc::new(MockTransport::new().with_default_response(MockResponse::unavailable(1)));

        let reprocessor = Reprocessor::new(queue.clone(), Arc::new(MockProcessingClient::new()), config())
            .with_indexer(Arc::new(OpenSearchIndexer::new(transport, "http://search:9200")));
        let outcome = reprocessor.poll_once().await.unwrap();

        assert_eq!(outcome.replayed, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_receive_error_is_returned() {
        let reprocessor = Reprocessor::new(Arc::new(FailingQueue::new()), Arc::new(MockProcessingClient::new()), config());
        assert!(reprocessor.poll_once().await.is_err());
    }

    #[tokio::test]
    async fn test_run_restores_fallback_when_idle_and_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        LocalFallbackStore::new(tmp.path())
            .write(&DlqMessage::new(ItemType::Post, Document::new().with("id", 9), "pipeline"))
            .await
            .unwrap();

        let queue = Arc::new(InMemoryQueue::default());
        let sink = Arc::new(DeadLetterSink::new(
            Some(queue.clone() as Arc<dyn DurableQueue>),
            LocalFallbackStore::new(tmp.path()),
        ));
        let processing = Arc::new(MockProcessingClient::new());
        let reprocessor = Arc::new(
            Reprocessor::new(
                queue.clone(),
                processing.clone(),
                ReprocessorConfig {
                    idle_delay: Duration::from_millis(10),
                    ..config()
                },
            )
            .with_sink(sink.clone()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = {
            let reprocessor = reprocessor.clone();
            tokio::spawn(async move { reprocessor.run(shutdown_rx).await })
        };

        // The first empty poll moves the fallback file onto the queue and a
        // later poll replays it.
        for _ in 0..500 {
            if !processing.replayed().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(processing.replayed(), vec![(ItemType::Post, "9".to_string())]);
        assert!(sink.get_fallback_items().await.unwrap().is_empty());
    }
}
