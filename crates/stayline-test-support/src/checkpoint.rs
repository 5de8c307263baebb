//! In-memory `CheckpointStore` with the same compare-and-swap rules as the
//! `store_subscription_checkpoint` stored function.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use stayline_core::checkpoint::{CheckpointStore, StoreCheckpointResult};
use stayline_core::error::DomainError;

/// Checkpoint rows keyed by subscription id. A row holding `None` is a reset
/// checkpoint.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    rows: Mutex<HashMap<String, Option<i64>>>,
    store_calls: Mutex<Vec<(String, i64, Option<i64>, StoreCheckpointResult)>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with one checkpoint already recorded.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn with_position(subscription_id: &str, position: i64) -> Self {
        let store = Self::new();
        store
            .rows
            .lock()
            .unwrap()
            .insert(subscription_id.to_owned(), Some(position));
        store
    }

    /// Returns every `store` call with its result, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn store_calls(&self) -> Vec<(String, i64, Option<i64>, StoreCheckpointResult)> {
        self.store_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, subscription_id: &str) -> Result<Option<i64>, DomainError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(subscription_id)
            .copied()
            .flatten())
    }

    async fn store(
        &self,
        subscription_id: &str,
        position: i64,
        previous: Option<i64>,
    ) -> Result<StoreCheckpointResult, DomainError> {
        let mut rows = self.rows.lock().unwrap();
        let result = match rows.get(subscription_id).copied() {
            Some(current) if current == previous => {
                rows.insert(subscription_id.to_owned(), Some(position));
                StoreCheckpointResult::Success(position)
            }
            Some(Some(current)) if current == position => StoreCheckpointResult::Ignored,
            None if previous.is_none() => {
                rows.insert(subscription_id.to_owned(), Some(position));
                StoreCheckpointResult::Success(position)
            }
            _ => StoreCheckpointResult::Mismatch,
        };
        self.store_calls.lock().unwrap().push((
            subscription_id.to_owned(),
            position,
            previous,
            result,
        ));
        Ok(result)
    }

    async fn reset(&self, subscription_id: &str) -> Result<(), DomainError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(subscription_id) {
            *row = None;
        }
        Ok(())
    }
}
