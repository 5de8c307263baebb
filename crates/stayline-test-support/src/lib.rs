//! Shared test doubles and in-memory stores for the Stayline guest ledger.

mod checkpoint;
mod clock;
mod command_bus;
mod dead_letter;
mod document;
mod event_log;

pub use checkpoint::InMemoryCheckpointStore;
pub use clock::FixedClock;
pub use command_bus::RecordingCommandBus;
pub use dead_letter::InMemoryDeadLetterStore;
pub use document::InMemoryDocumentStore;
pub use event_log::{FailingEventLog, InMemoryEventLog, stored_event};
