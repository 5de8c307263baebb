//! `PostgreSQL` implementation of the `DeadLetterStore` trait.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use stayline_core::dead_letter::{DeadLetter, DeadLetterStore};
use stayline_core::error::DomainError;

use crate::db_error;

/// Dead letters in `subscription_dead_letters`, one row per subscription and
/// position. Recording the same position again replaces the error details.
#[derive(Debug, Clone)]
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    /// Creates a new `PgDeadLetterStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterStore for PgDeadLetterStore {
    async fn record(&self, dead_letter: DeadLetter) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO subscription_dead_letters \
             (subscription_id, position, stream_id, event_id, event_type, payload, error, \
              attempts, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (subscription_id, position) DO UPDATE \
             SET error = EXCLUDED.error, attempts = EXCLUDED.attempts, \
                 failed_at = EXCLUDED.failed_at",
        )
        .bind(&dead_letter.subscription_id)
        .bind(dead_letter.position)
        .bind(dead_letter.stream_id)
        .bind(dead_letter.event_id)
        .bind(&dead_letter.event_type)
        .bind(&dead_letter.payload)
        .bind(&dead_letter.error)
        .bind(i32::try_from(dead_letter.attempts).unwrap_or(i32::MAX))
        .bind(dead_letter.failed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list(&self, subscription_id: &str) -> Result<Vec<DeadLetter>, DomainError> {
        let rows = sqlx::query(
            "SELECT subscription_id, position, stream_id, event_id, event_type, payload, error, \
             attempts, failed_at FROM subscription_dead_letters \
             WHERE subscription_id = $1 ORDER BY position ASC",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let attempts: i32 = row.try_get("attempts")?;
                Ok(DeadLetter {
                    subscription_id: row.try_get("subscription_id")?,
                    position: row.try_get("position")?,
                    stream_id: row.try_get("stream_id")?,
                    event_id: row.try_get("event_id")?,
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("payload")?,
                    error: row.try_get("error")?,
                    attempts: u32::try_from(attempts).unwrap_or(0),
                    failed_at: row.try_get("failed_at")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(db_error)
    }
}
