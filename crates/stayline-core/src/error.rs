//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

use crate::event_log::ExpectedVersion;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: Uuid,
        /// The version the writer expected.
        expected: ExpectedVersion,
        /// The actual version found (0 for an empty stream).
        actual: i64,
    },

    /// A stream was created with an id that is already in use.
    #[error("stream already exists: {0}")]
    StreamAlreadyExists(Uuid),

    /// A command required an expected version but none was supplied.
    #[error("an expected version is required for this operation")]
    MissingExpectedVersion,

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors raised by optimistic concurrency checks.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::StreamAlreadyExists(_)
        )
    }
}
