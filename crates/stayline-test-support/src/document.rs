//! In-memory `DocumentStore` for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use stayline_core::document::{DocumentStore, NetOperation, Versioned};
use stayline_core::error::DomainError;
use uuid::Uuid;

/// Documents in a map, plus a log of every committed batch of operations.
///
/// Commits are all-or-nothing: inserting an existing id or updating/deleting
/// a missing one fails the whole batch, as the database would.
#[derive(Debug)]
pub struct InMemoryDocumentStore<V> {
    documents: Mutex<HashMap<Uuid, Versioned<V>>>,
    commits: Mutex<Vec<Vec<NetOperation<V>>>>,
    failing_commits: AtomicUsize,
}

impl<V: Clone> InMemoryDocumentStore<V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            commits: Mutex::new(Vec::new()),
            failing_commits: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` commits fail with an infrastructure error
    /// without writing anything.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Seeds a document without recording a commit.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seed(&self, id: Uuid, document: V, last_position: i64) {
        self.documents.lock().unwrap().insert(
            id,
            Versioned {
                document,
                last_position,
            },
        );
    }

    /// Returns a copy of one document.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn document(&self, id: Uuid) -> Option<Versioned<V>> {
        self.documents.lock().unwrap().get(&id).cloned()
    }

    /// Returns every committed batch of operations, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn commits(&self) -> Vec<Vec<NetOperation<V>>> {
        self.commits.lock().unwrap().clone()
    }
}

impl<V: Clone> Default for InMemoryDocumentStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> DocumentStore<V> for InMemoryDocumentStore<V>
where
    V: Clone + Send + Sync,
{
    async fn load(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Versioned<V>>, DomainError> {
        let documents = self.documents.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(id).map(|doc| (*id, doc.clone())))
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Versioned<V>>, DomainError> {
        Ok(self.documents.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Versioned<V>>, DomainError> {
        let documents = self.documents.lock().unwrap();
        let mut all: Vec<Versioned<V>> = documents.values().cloned().collect();
        all.sort_by_key(|doc| doc.last_position);
        Ok(all)
    }

    async fn commit(&self, operations: Vec<NetOperation<V>>) -> Result<(), DomainError> {
        if self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DomainError::Infrastructure(
                "simulated document commit failure".to_owned(),
            ));
        }
        let mut documents = self.documents.lock().unwrap();
        for operation in &operations {
            let exists = documents.contains_key(&operation.id());
            let valid = match operation {
                NetOperation::Insert { .. } => !exists,
                NetOperation::Update { .. } | NetOperation::Delete { .. } => exists,
            };
            if !valid {
                return Err(DomainError::Infrastructure(format!(
                    "invalid document operation for {}",
                    operation.id()
                )));
            }
        }
        for operation in operations.iter().cloned() {
            match operation {
                NetOperation::Insert { id, document } | NetOperation::Update { id, document } => {
                    documents.insert(id, document);
                }
                NetOperation::Delete { id } => {
                    documents.remove(&id);
                }
            }
        }
        self.commits.lock().unwrap().push(operations);
        Ok(())
    }
}
