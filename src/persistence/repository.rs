use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::repository::ItemRepository;
use crate::types::{Entity, ItemType};

/// Stores entities as JSONB documents in one table per item type.
///
/// Rows are upserted by id. Constraint violations reported by the server
/// count as a refused write (`Ok(false)`); connection failures and other
/// errors are returned.
pub struct PostgresRepository<T> {
    pool: Pool,
    table: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> PostgresRepository<T> {
    /// Creates a repository writing to `table`.
    pub fn new(pool: Pool, table: impl Into<String>) -> PipelineResult<Self> {
        let table = table.into();
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(PipelineError::Configuration {
                message: format!("Invalid table name: {}", table),
            });
        }
        Ok(Self {
            pool,
            table,
            _entity: PhantomData,
        })
    }

    /// Creates a repository using the default table for `item_type`.
    pub fn for_item_type(pool: Pool, item_type: ItemType) -> PipelineResult<Self> {
        Self::new(pool, format!("{}s", item_type.as_str()))
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the table if it does not exist.
    pub async fn ensure_schema(&self) -> PipelineResult<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    document JSONB NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.table
            ))
            .await?;
        Ok(())
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, document, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document, updated_at = NOW()",
            self.table
        )
    }
}

#[async_trait]
impl<T: Entity + 'static> ItemRepository<T> for PostgresRepository<T> {
    async fn save(&self, item: &T) -> PipelineResult<bool> {
        let id = item.id();
        let document = item.to_document().to_json()?;
        let client = self.pool.get().await?;

        match client.execute(&self.upsert_sql(), &[&id, &document]).await {
            Ok(_) => {
                debug!(table = %self.table, item_id = %id, "Saved item");
                Ok(true)
            }
            Err(err) if err.as_db_error().is_some() => {
                warn!(table = %self.table, item_id = %id, error = %err, "Database refused item");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}
