//! The seam between a subscription and whatever consumes its events.

use async_trait::async_trait;
use stayline_core::error::DomainError;
use stayline_core::event_log::RecordedEvent;

/// Consumes batches of events delivered by a subscription.
///
/// Handlers must tolerate redelivery: a batch that fails, or that succeeds
/// just before the process dies, is delivered again.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Handles events in global position order. An error fails the whole
    /// batch.
    async fn handle(&self, events: &[RecordedEvent]) -> Result<(), DomainError>;
}
