//! Storage doubles that always fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

use crate::dlq::{DurableQueue, ReceivedMessage};
use crate::errors::{PipelineError, PipelineResult};
use crate::resilience::{CircuitSnapshot, CircuitStateStore};

fn store_down() -> PipelineError {
    PipelineError::StateStore {
        message: "state store unreachable".to_string(),
    }
}

/// Circuit state store whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingCircuitStore;

#[async_trait]
impl CircuitStateStore for FailingCircuitStore {
    async fn load(&self, _key: &str, _now: DateTime<Utc>) -> PipelineResult<Option<CircuitSnapshot>> {
        Err(store_down())
    }

    async fn record_failure(
        &self,
        _key: &str,
        _now: DateTime<Utc>,
        _ttl: Duration,
    ) -> PipelineResult<CircuitSnapshot> {
        Err(store_down())
    }

    async fn reset(&self, _key: &str) -> PipelineResult<()> {
        Err(store_down())
    }

    async fn reset_if_unchanged(
        &self,
        _key: &str,
        _observed: &CircuitSnapshot,
    ) -> PipelineResult<bool> {
        Err(store_down())
    }
}

/// Durable queue that rejects every call and counts send attempts.
#[derive(Debug, Default)]
pub struct FailingQueue {
    sends: Mutex<usize>,
}

impl FailingQueue {
    /// Creates a failing queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rejected sends.
    pub fn send_attempts(&self) -> usize {
        *self.sends.lock()
    }

    fn unreachable() -> PipelineError {
        PipelineError::Queue {
            message: "queue unreachable".to_string(),
        }
    }
}

#[async_trait]
impl DurableQueue for FailingQueue {
    async fn send(&self, _body: String) -> PipelineResult<()> {
        *self.sends.lock() += 1;
        Err(Self::unreachable())
    }

    async fn receive(
        &self,
        _max_messages: u32,
        _wait_time: Duration,
    ) -> PipelineResult<Vec<ReceivedMessage>> {
        Err(Self::unreachable())
    }

    async fn delete(&self, _handle: &str) -> PipelineResult<()> {
        Err(Self::unreachable())
    }
}
