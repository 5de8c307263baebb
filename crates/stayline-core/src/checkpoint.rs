//! Durable, compare-and-swap position tracking per subscription.

use async_trait::async_trait;

use crate::error::DomainError;

/// Outcome of [`CheckpointStore::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCheckpointResult {
    /// The checkpoint now holds the given position.
    Success(i64),
    /// The checkpoint already held the new position; nothing changed.
    Ignored,
    /// The checkpoint was not at the expected previous position.
    Mismatch,
}

impl StoreCheckpointResult {
    /// Maps the stored procedure's integer code (`1`, `0`, `2`).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` for any other code.
    pub fn from_code(code: i32, position: i64) -> Result<Self, DomainError> {
        match code {
            1 => Ok(Self::Success(position)),
            0 => Ok(Self::Ignored),
            2 => Ok(Self::Mismatch),
            other => Err(DomainError::Infrastructure(format!(
                "unexpected checkpoint result code: {other}"
            ))),
        }
    }
}

/// Tracks the last processed global position of each subscription.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored position, or `None` if the subscription never ran
    /// (or was reset).
    async fn load(&self, subscription_id: &str) -> Result<Option<i64>, DomainError>;

    /// Atomically moves the checkpoint from `previous` to `position`.
    ///
    /// * no row and `previous == None`: insert, `Success`
    /// * row at exactly `previous`: update, `Success`
    /// * row already at `position`: `Ignored`
    /// * anything else: `Mismatch`
    async fn store(
        &self,
        subscription_id: &str,
        position: i64,
        previous: Option<i64>,
    ) -> Result<StoreCheckpointResult, DomainError>;

    /// Clears the stored position so the next start replays from the
    /// beginning.
    async fn reset(&self, subscription_id: &str) -> Result<(), DomainError>;
}
