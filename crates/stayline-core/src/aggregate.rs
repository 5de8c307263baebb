//! Aggregate root abstraction.

use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::event_log::StoredEvent;

/// Trait for aggregate roots that reconstitute from event history.
///
/// Command methods validate against current state, enqueue an event and fold
/// it into state immediately, so `version` always reflects every event the
/// caller can observe, committed or not.
pub trait AggregateRoot: Send + Sync + Sized {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent + Clone;

    /// Returns the empty instance that replay starts from.
    fn empty(id: Uuid) -> Self;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of events applied).
    fn version(&self) -> i64;

    /// Apply an event to mutate internal state.
    fn apply(&mut self, event: &Self::Event);

    /// Rebuilds a typed event from its stored form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the event type is unknown or
    /// the payload cannot be decoded.
    fn decode_event(stored: &StoredEvent) -> Result<Self::Event, DomainError>;

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);

    /// The version the stream was at before the uncommitted events.
    fn persisted_version(&self) -> i64 {
        let pending = i64::try_from(self.uncommitted_events().len()).unwrap_or(i64::MAX);
        self.version() - pending
    }
}
