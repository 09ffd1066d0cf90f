use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use std::time::Duration;
use tokio_postgres::Row;
use tracing::debug;

use crate::errors::{PipelineError, PipelineResult};
use crate::resilience::{ttl_after, CircuitSnapshot, CircuitStateStore};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS circuit_breaker_state (
    key TEXT PRIMARY KEY,
    failures BIGINT NOT NULL DEFAULT 0,
    last_failure_at TIMESTAMPTZ,
    expires_at TIMESTAMPTZ NOT NULL
)";

const LOAD: &str = "SELECT failures, last_failure_at FROM circuit_breaker_state
    WHERE key = $1 AND expires_at > $2";

// An expired row restarts the count instead of incrementing it.
const RECORD_FAILURE: &str = "INSERT INTO circuit_breaker_state AS s
    (key, failures, last_failure_at, expires_at) VALUES ($1, 1, $2, $3)
    ON CONFLICT (key) DO UPDATE SET
        failures = CASE WHEN s.expires_at > $2 THEN s.failures + 1 ELSE 1 END,
        last_failure_at = EXCLUDED.last_failure_at,
        expires_at = EXCLUDED.expires_at
    RETURNING failures, last_failure_at";

const RESET: &str = "UPDATE circuit_breaker_state SET failures = 0 WHERE key = $1";

const RESET_IF_UNCHANGED: &str = "UPDATE circuit_breaker_state SET failures = 0
    WHERE key = $1 AND failures = $2 AND last_failure_at IS NOT DISTINCT FROM $3";

const PURGE_EXPIRED: &str = "DELETE FROM circuit_breaker_state WHERE expires_at <= $1";

fn store_error(err: impl std::fmt::Display) -> PipelineError {
    PipelineError::StateStore {
        message: err.to_string(),
    }
}

fn snapshot_from_row(row: &Row) -> PipelineResult<CircuitSnapshot> {
    let failures: i64 = row.try_get(0).map_err(store_error)?;
    Ok(CircuitSnapshot {
        failures: u64::try_from(failures).map_err(store_error)?,
        last_failure_at: row.try_get(1).map_err(store_error)?,
    })
}

/// Circuit state shared through a Postgres table.
///
/// Failure recording is a single upsert and the timed reset a conditional
/// update, so any number of processes can share one table.
#[derive(Clone)]
pub struct PostgresCircuitStore {
    pool: Pool,
}

impl PostgresCircuitStore {
    /// Creates a store over a connection pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the state table if it does not exist.
    pub async fn ensure_schema(&self) -> PipelineResult<()> {
        let client = self.pool.get().await.map_err(store_error)?;
        client
            .batch_execute(CREATE_TABLE)
            .await
            .map_err(store_error)
    }

    /// Deletes rows that expired before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> PipelineResult<u64> {
        let client = self.pool.get().await.map_err(store_error)?;
        let deleted = client
            .execute(PURGE_EXPIRED, &[&now])
            .await
            .map_err(store_error)?;
        debug!(deleted, "Purged expired circuit state");
        Ok(deleted)
    }
}

#[async_trait]
impl CircuitStateStore for PostgresCircuitStore {
    async fn load(&self, key: &str, now: DateTime<Utc>) -> PipelineResult<Option<CircuitSnapshot>> {
        let client = self.pool.get().await.map_err(store_error)?;
        let row = client
            .query_opt(LOAD, &[&key, &now])
            .await
            .map_err(store_error)?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn record_failure(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> PipelineResult<CircuitSnapshot> {
        let expires_at = ttl_after(now, ttl)?;
        let client = self.pool.get().await.map_err(store_error)?;
        let row = client
            .query_one(RECORD_FAILURE, &[&key, &now, &expires_at])
            .await
            .map_err(store_error)?;
        snapshot_from_row(&row)
    }

    async fn reset(&self, key: &str) -> PipelineResult<()> {
        let client = self.pool.get().await.map_err(store_error)?;
        client
            .execute(RESET, &[&key])
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn reset_if_unchanged(
        &self,
        key: &str,
        observed: &CircuitSnapshot,
    ) -> PipelineResult<bool> {
        let failures = i64::try_from(observed.failures).map_err(store_error)?;
        let client = self.pool.get().await.map_err(store_error)?;
        let updated = client
            .execute(
                RESET_IF_UNCHANGED,
                &[&key, &failures, &observed.last_failure_at],
            )
            .await
            .map_err(store_error)?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{connect_pool, DatabaseConfig};

    fn unreachable_store() -> PostgresCircuitStore {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        PostgresCircuitStore::new(connect_pool(&config).unwrap())
    }

    #[tokio::test]
    async fn test_unreachable_database_is_state_store_error() {
        let store = unreachable_store();
        let err = store.load("catalog", Utc::now()).await.unwrap_err();
        assert!(matches!(err, PipelineError::StateStore { .. }));
    }

    #[test]
    fn test_record_failure_is_single_statement() {
        assert!(RECORD_FAILURE.contains("ON CONFLICT (key) DO UPDATE"));
        assert!(RECORD_FAILURE.contains("RETURNING failures, last_failure_at"));
    }
}
