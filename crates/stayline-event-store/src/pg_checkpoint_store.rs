//! `PostgreSQL` implementation of the `CheckpointStore` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use stayline_core::checkpoint::{CheckpointStore, StoreCheckpointResult};
use stayline_core::error::DomainError;

use crate::db_error;

/// Checkpoints in `subscription_checkpoints`, advanced through the
/// `store_subscription_checkpoint` function so the compare-and-swap happens
/// in a single statement on the server.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    /// Creates a new `PgCheckpointStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, subscription_id: &str) -> Result<Option<i64>, DomainError> {
        let row: Option<Option<i64>> =
            sqlx::query_scalar("SELECT position FROM subscription_checkpoints WHERE id = $1")
                .bind(subscription_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.flatten())
    }

    #[instrument(skip(self))]
    async fn store(
        &self,
        subscription_id: &str,
        position: i64,
        previous: Option<i64>,
    ) -> Result<StoreCheckpointResult, DomainError> {
        let code: i32 = sqlx::query_scalar("SELECT store_subscription_checkpoint($1, $2, $3)")
            .bind(subscription_id)
            .bind(position)
            .bind(previous)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        StoreCheckpointResult::from_code(code, position)
    }

    #[instrument(skip(self))]
    async fn reset(&self, subscription_id: &str) -> Result<(), DomainError> {
        sqlx::query("UPDATE subscription_checkpoints SET position = NULL WHERE id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
