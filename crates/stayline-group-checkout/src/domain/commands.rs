//! Commands for the Group Checkout context.

use stayline_core::command::Command;
use uuid::Uuid;

/// Command to check out several guest stays together.
#[derive(Debug, Clone)]
pub struct InitiateGroupCheckout {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The group checkout identifier.
    pub group_checkout_id: Uuid,
    /// The clerk requesting the checkout.
    pub clerk_id: Uuid,
    /// The guest stays to check out.
    pub guest_stay_ids: Vec<Uuid>,
}

impl Command for InitiateGroupCheckout {
    fn command_type(&self) -> &'static str {
        "group_checkout.initiate"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
