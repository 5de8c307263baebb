//! In-memory `DeadLetterStore` for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use stayline_core::dead_letter::{DeadLetter, DeadLetterStore};
use stayline_core::error::DomainError;

/// Dead letters kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    letters: Mutex<Vec<DeadLetter>>,
    failing: AtomicBool,
}

impl InMemoryDeadLetterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While `failing` is set, `record` returns an infrastructure error and
    /// stores nothing.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns every recorded dead letter.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn all(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn record(&self, dead_letter: DeadLetter) -> Result<(), DomainError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::Infrastructure(
                "simulated dead letter store failure".to_owned(),
            ));
        }
        self.letters.lock().unwrap().push(dead_letter);
        Ok(())
    }

    async fn list(&self, subscription_id: &str) -> Result<Vec<DeadLetter>, DomainError> {
        let mut letters: Vec<DeadLetter> = self
            .letters
            .lock()
            .unwrap()
            .iter()
            .filter(|letter| letter.subscription_id == subscription_id)
            .cloned()
            .collect();
        letters.sort_by_key(|letter| letter.position);
        Ok(letters)
    }
}
