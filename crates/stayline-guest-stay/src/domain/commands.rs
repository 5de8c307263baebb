//! Commands for the Guest Stay context.

use stayline_core::command::Command;
use uuid::Uuid;

/// Command to check a guest in, opening a new account.
#[derive(Debug, Clone)]
pub struct CheckInGuest {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
}

/// Command to post a charge.
#[derive(Debug, Clone)]
pub struct RecordCharge {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// Amount in cents.
    pub amount: i64,
}

/// Command to post a payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// Amount in cents.
    pub amount: i64,
}

/// Command to check a guest out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutGuest {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// Set when the checkout is part of a group checkout.
    pub group_checkout_id: Option<Uuid>,
}

impl Command for CheckInGuest {
    fn command_type(&self) -> &'static str {
        "guest_stay.check_in"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for RecordCharge {
    fn command_type(&self) -> &'static str {
        "guest_stay.record_charge"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for RecordPayment {
    fn command_type(&self) -> &'static str {
        "guest_stay.record_payment"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for CheckOutGuest {
    fn command_type(&self) -> &'static str {
        "guest_stay.check_out"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
