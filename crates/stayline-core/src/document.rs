//! Keyed document storage written as coalesced net operations.
//!
//! Read models and process-manager state are both documents: a value keyed
//! by id, stamped with the global position of the last event folded into it.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// A document together with the position of the last event applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<V> {
    /// The document.
    pub document: V,
    /// Global position of the last event folded into the document.
    pub last_position: i64,
}

/// The single write queued for one document id.
#[derive(Debug, Clone, PartialEq)]
pub enum NetOperation<V> {
    /// The document did not exist and must be inserted.
    Insert {
        /// Document id.
        id: Uuid,
        /// The new document.
        document: Versioned<V>,
    },
    /// The document existed and must be replaced.
    Update {
        /// Document id.
        id: Uuid,
        /// The replacement.
        document: Versioned<V>,
    },
    /// The document existed and must be removed.
    Delete {
        /// Document id.
        id: Uuid,
    },
}

impl<V> NetOperation<V> {
    /// The id the operation targets.
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Self::Insert { id, .. } | Self::Update { id, .. } | Self::Delete { id } => *id,
        }
    }
}

/// Storage for documents of one kind.
#[async_trait]
pub trait DocumentStore<V>: Send + Sync
where
    V: Send + Sync,
{
    /// Loads the documents that exist among `ids`.
    async fn load(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Versioned<V>>, DomainError>;

    /// Loads one document.
    async fn get(&self, id: Uuid) -> Result<Option<Versioned<V>>, DomainError>;

    /// Lists every document.
    async fn list(&self) -> Result<Vec<Versioned<V>>, DomainError>;

    /// Applies all operations in a single transaction.
    async fn commit(&self, operations: Vec<NetOperation<V>>) -> Result<(), DomainError>;
}
