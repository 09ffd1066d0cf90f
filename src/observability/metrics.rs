//! Metrics collection for pipeline runs and DLQ replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::resilience::CircuitState;
use crate::types::{ItemErrorStatus, ItemType};

/// Where a dead-lettered item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterOutcome {
    /// Accepted by the durable queue.
    Queued,
    /// Written to the local fallback directory.
    Fallback,
    /// Neither store accepted it.
    Lost,
}

impl DeadLetterOutcome {
    /// Returns the lowercase outcome name.
    pub fn as_str(self) -> &'static str {
        match self {
            DeadLetterOutcome::Queued => "queued",
            DeadLetterOutcome::Fallback => "fallback",
            DeadLetterOutcome::Lost => "lost",
        }
    }
}

/// Metrics collector injected into the pipeline components.
pub trait MetricsCollector: Send + Sync {
    /// Records an item persisted and handed to processing.
    fn record_item_processed(&self, item_type: ItemType);

    /// Records an item failure.
    fn record_item_error(&self, item_type: ItemType, status: ItemErrorStatus);

    /// Records a retry attempt.
    fn record_retry(&self, operation: &str, attempt: u32);

    /// Records a circuit breaker state change.
    fn record_circuit_state(&self, service: &str, state: CircuitState);

    /// Records the outcome of a dead-letter write.
    fn record_dead_letter(&self, outcome: DeadLetterOutcome);

    /// Records a DLQ replay attempt and how many deliveries it has taken.
    fn record_replay(&self, item_type: ItemType, retry_count: u32, success: bool);

    /// Gets current metrics snapshot.
    fn get_metrics(&self) -> ServiceMetrics;
}

/// Aggregated service metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMetrics {
    /// Posts persisted and handed to processing.
    pub posts_processed: u64,
    /// Comments persisted and handed to processing.
    pub comments_processed: u64,
    /// Item failures keyed by status name.
    pub item_errors: HashMap<String, u64>,
    /// Total retries across all operations.
    pub total_retries: u64,
    /// Dead-letter writes keyed by outcome name.
    pub dead_letters: HashMap<String, u64>,
    /// Successful replays.
    pub replays_succeeded: u64,
    /// Failed replays.
    pub replays_failed: u64,
    /// Highest retry count seen on a replayed message.
    pub max_replay_retry_count: u64,
    /// Last reported state per service.
    pub circuit_states: HashMap<String, String>,
}

/// Default in-memory metrics collector.
pub struct DefaultMetricsCollector {
    posts_processed: AtomicU64,
    comments_processed: AtomicU64,
    total_retries: AtomicU64,
    replays_succeeded: AtomicU64,
    replays_failed: AtomicU64,
    max_replay_retry_count: AtomicU64,
    item_errors: RwLock<HashMap<String, u64>>,
    dead_letters: RwLock<HashMap<String, u64>>,
    circuit_states: RwLock<HashMap<String, String>>,
}

impl Default for DefaultMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            posts_processed: AtomicU64::new(0),
            comments_processed: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
            replays_succeeded: AtomicU64::new(0),
            replays_failed: AtomicU64::new(0),
            max_replay_retry_count: AtomicU64::new(0),
            item_errors: RwLock::new(HashMap::new()),
            dead_letters: RwLock::new(HashMap::new()),
            circuit_states: RwLock::new(HashMap::new()),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        self.posts_processed.store(0, Ordering::SeqCst);
        self.comments_processed.store(0, Ordering::SeqCst);
        self.total_retries.store(0, Ordering::SeqCst);
        self.replays_succeeded.store(0, Ordering::SeqCst);
        self.replays_failed.store(0, Ordering::SeqCst);
        self.max_replay_retry_count.store(0, Ordering::SeqCst);

        if let Ok(mut errors) = self.item_errors.write() {
            errors.clear();
        }
        if let Ok(mut dead_letters) = self.dead_letters.write() {
            dead_letters.clear();
        }
        if let Ok(mut states) = self.circuit_states.write() {
            states.clear();
        }
    }
}

fn status_name(status: ItemErrorStatus) -> &'static str {
    match status {
        ItemErrorStatus::FetchFailed => "fetch_failed",
        ItemErrorStatus::Invalid => "invalid",
        ItemErrorStatus::PersistFailed => "persist_failed",
        ItemErrorStatus::ProcessFailed => "process_failed",
        ItemErrorStatus::ChildrenFailed => "children_failed",
    }
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_item_processed(&self, item_type: ItemType) {
        let counter = match item_type {
            ItemType::Post => &self.posts_processed,
            ItemType::Comment => &self.comments_processed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn record_item_error(&self, item_type: ItemType, status: ItemErrorStatus) {
        if let Ok(mut errors) = self.item_errors.write() {
            let key = format!("{}.{}", item_type, status_name(status));
            *errors.entry(key).or_insert(0) += 1;
        }
    }

    fn record_retry(&self, _operation: &str, _attempt: u32) {
        self.total_retries.fetch_add(1, Ordering::SeqCst);
    }

    fn record_circuit_state(&self, service: &str, state: CircuitState) {
        if let Ok(mut states) = self.circuit_states.write() {
            states.insert(service.to_string(), state.as_str().to_string());
        }
    }

    fn record_dead_letter(&self, outcome: DeadLetterOutcome) {
        if let Ok(mut dead_letters) = self.dead_letters.write() {
            *dead_letters.entry(outcome.as_str().to_string()).or_insert(0) += 1;
        }
    }

    fn record_replay(&self, _item_type: ItemType, retry_count: u32, success: bool) {
        self.max_replay_retry_count
            .fetch_max(u64::from(retry_count), Ordering::SeqCst);
        if success {
            self.replays_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.replays_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn get_metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            posts_processed: self.posts_processed.load(Ordering::SeqCst),
            comments_processed: self.comments_processed.load(Ordering::SeqCst),
            item_errors: self
                .item_errors
                .read()
                .map(|r| r.clone())
                .unwrap_or_default(),
            total_retries: self.total_retries.load(Ordering::SeqCst),
            dead_letters: self
                .dead_letters
                .read()
                .map(|r| r.clone())
                .unwrap_or_default(),
            replays_succeeded: self.replays_succeeded.load(Ordering::SeqCst),
            replays_failed: self.replays_failed.load(Ordering::SeqCst),
            max_replay_retry_count: self.max_replay_retry_count.load(Ordering::SeqCst),
            circuit_states: self
                .circuit_states
                .read()
                .map(|r| r.clone())
                .unwrap_or_default(),
        }
    }
}

/// No-op metrics collector for when metrics are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_item_processed(&self, _item_type: ItemType) {}
    fn record_item_error(&self, _item_type: ItemType, _status: ItemErrorStatus) {}
    fn record_retry(&self, _operation: &str, _attempt: u32) {}
    fn record_circuit_state(&self, _service: &str, _state: CircuitState) {}
    fn record_dead_letter(&self, _outcome: DeadLetterOutcome) {}
    fn record_replay(&self, _item_type: ItemType, _retry_count: u32, _success: bool) {}
    fn get_metrics(&self) -> ServiceMetrics {
        ServiceMetrics::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_metrics_collector() {
        let collector = DefaultMetricsCollector::new();

        collector.record_item_processed(ItemType::Post);
        collector.record_item_processed(ItemType::Post);
        collector.record_item_processed(ItemType::Comment);
        collector.record_item_error(ItemType::Post, ItemErrorStatus::PersistFailed);
        collector.record_retry("catalog.list", 1);
        collector.record_dead_letter(DeadLetterOutcome::Fallback);
        collector.record_replay(ItemType::Post, 1, true);
        collector.record_replay(ItemType::Comment, 3, false);
        collector.record_circuit_state("processing", CircuitState::Open);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.posts_processed, 2);
        assert_eq!(metrics.comments_processed, 1);
        assert_eq!(metrics.item_errors.get("post.persist_failed"), Some(&1));
        assert_eq!(metrics.total_retries, 1);
        assert_eq!(metrics.dead_letters.get("fallback"), Some(&1));
        assert_eq!(metrics.replays_succeeded, 1);
        assert_eq!(metrics.replays_failed, 1);
        assert_eq!(metrics.max_replay_retry_count, 3);
        assert_eq!(
            metrics.circuit_states.get("processing").map(String::as_str),
            Some("open")
        );
    }

    #[test]
    fn test_metrics_collector_reset() {
        let collector = DefaultMetricsCollector::new();

        collector.record_item_processed(ItemType::Post);
        collector.record_dead_letter(DeadLetterOutcome::Queued);
        collector.reset();

        assert_eq!(collector.get_metrics(), ServiceMetrics::default());
    }
}
