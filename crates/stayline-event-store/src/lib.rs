//! Stayline: PostgreSQL storage.
//!
//! Implements the core storage traits on top of a single `PgPool`. The schema
//! lives in the workspace `migrations/` directory and is applied through
//! [`schema::MIGRATOR`].

pub mod pg_checkpoint_store;
pub mod pg_dead_letter_store;
pub mod pg_document_store;
pub mod pg_event_log;
pub mod schema;

pub use pg_checkpoint_store::PgCheckpointStore;
pub use pg_dead_letter_store::PgDeadLetterStore;
pub use pg_document_store::PgDocumentStore;
pub use pg_event_log::PgEventLog;

use stayline_core::error::DomainError;

pub(crate) fn db_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {err}"))
}
