//! Command abstractions.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DomainError;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;
}

/// Delivers commands to their handlers. Fire-and-forget: an `Ok` means the
/// command was accepted for delivery, not that it succeeded.
#[async_trait]
pub trait CommandBus<C: Command>: Send + Sync {
    /// Schedules `command` for delivery.
    async fn schedule(&self, command: C) -> Result<(), DomainError>;
}
