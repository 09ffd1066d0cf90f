//! Shared circuit breaker state.
//!
//! Breaker state is keyed by service name and may be shared by several
//! pipeline and reprocessor instances. Stores expose only atomic primitives:
//! failure recording increments and stamps in one step, and the timed reset
//! is a compare-and-swap against a previously observed snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::{PipelineError, PipelineResult};

/// Point-in-time view of one service's breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitSnapshot {
    /// Consecutive failures recorded since the last reset.
    pub failures: u64,
    /// Time of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Storage backend for circuit breaker state.
#[async_trait]
pub trait CircuitStateStore: Send + Sync {
    /// Loads the live state for `key`, or `None` if absent or expired.
    async fn load(&self, key: &str, now: DateTime<Utc>) -> PipelineResult<Option<CircuitSnapshot>>;

    /// Atomically increments the failure count, stamps `now` as the last
    /// failure and extends the entry's lifetime to `now + ttl`.
    async fn record_failure(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> PipelineResult<CircuitSnapshot>;

    /// Zeroes the failure count.
    async fn reset(&self, key: &str) -> PipelineResult<()>;

    /// Zeroes the failure count only if the stored state still equals
    /// `observed`. Returns whether the reset was applied.
    async fn reset_if_unchanged(&self, key: &str, observed: &CircuitSnapshot)
        -> PipelineResult<bool>;
}

pub(crate) fn ttl_after(now: DateTime<Utc>, ttl: Duration) -> PipelineResult<DateTime<Utc>> {
    let ttl = ChronoDuration::from_std(ttl).map_err(|e| PipelineError::Configuration {
        message: format!("Invalid circuit state TTL: {}", e),
    })?;
    Ok(now + ttl)
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    snapshot: CircuitSnapshot,
    expires_at: DateTime<Utc>,
}

/// Process-local state store.
///
/// Every operation runs inside one short critical section, so concurrent
/// callers within the process never lose updates. Instances that must share
/// state across processes use the Postgres store instead.
#[derive(Default)]
pub struct InMemoryCircuitStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCircuitStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops entries that expired before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl CircuitStateStore for InMemoryCircuitStore {
    async fn load(&self, key: &str, now: DateTime<Utc>) -> PipelineResult<Option<CircuitSnapshot>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.snapshot)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn record_failure(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> PipelineResult<CircuitSnapshot> {
        let expires_at = ttl_after(now, ttl)?;
        let mut entries = self.entries.lock();

        let failures = match entries.get(key) {
            Some(entry) if entry.expires_at > now => entry.snapshot.failures + 1,
            _ => 1,
        };
        let snapshot = CircuitSnapshot {
            failures,
            last_failure_at: Some(now),
        };
        entries.insert(
            key.to_string(),
            Entry {
                snapshot,
                expires_at,
            },
        );
        Ok(snapshot)
    }

    async fn reset(&self, key: &str) -> PipelineResult<()> {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.snapshot.failures = 0;
        }
        Ok(())
    }

    async fn reset_if_unchanged(
        &self,
        key: &str,
        observed: &CircuitSnapshot,
    ) -> PipelineResult<bool> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.snapshot == *observed => {
                entry.snapshot.failures = 0;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(120);

    #[tokio::test]
    async fn test_record_failure_increments_and_stamps() {
        let store = InMemoryCircuitStore::new();
        let now = Utc::now();

        store.record_failure("catalog", now, TTL).await.unwrap();
        let snapshot = store.record_failure("catalog", now, TTL).await.unwrap();

        assert_eq!(snapshot.failures, 2);
        assert_eq!(snapshot.last_failure_at, Some(now));
        assert_eq!(store.load("catalog", now).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = InMemoryCircuitStore::new();
        let now = Utc::now();
        store.record_failure("catalog", now, TTL).await.unwrap();

        let later = now + ChronoDuration::seconds(121);
        assert_eq!(store.load("catalog", later).await.unwrap(), None);

        let snapshot = store.record_failure("catalog", later, TTL).await.unwrap();
        assert_eq!(snapshot.failures, 1);
    }

    #[tokio::test]
    async fn test_reset_if_unchanged_detects_concurrent_failure() {
        let store = InMemoryCircuitStore::new();
        let now = Utc::now();
        let observed = store.record_failure("catalog", now, TTL).await.unwrap();
        store.record_failure("catalog", now, TTL).await.unwrap();

        assert!(!store.reset_if_unchanged("catalog", &observed).await.unwrap());

        let current = store.load("catalog", now).await.unwrap().unwrap();
        assert!(store.reset_if_unchanged("catalog", &current).await.unwrap());
        assert_eq!(store.load("catalog", now).await.unwrap().unwrap().failures, 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryCircuitStore::new());
        let now = Utc::now();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.record_failure("catalog", now, TTL).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.load("catalog", now).await.unwrap().unwrap().failures, 50);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryCircuitStore::new();
        let now = Utc::now();
        store.record_failure("a", now, TTL).await.unwrap();
        store.record_failure("b", now, Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.purge_expired(now + ChronoDuration::seconds(5)), 1);
        assert_eq!(store.len(), 1);
    }
}
