//! Domain events for the Guest Stay context.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stayline_core::event::{DomainEvent, EventMetadata, EventTypeRegistry};
use uuid::Uuid;

/// Event type identifier for [`GuestCheckedIn`].
pub const GUEST_CHECKED_IN_EVENT_TYPE: &str = "guest_stay.checked_in";
/// Event type identifier for [`ChargeRecorded`].
pub const CHARGE_RECORDED_EVENT_TYPE: &str = "guest_stay.charge_recorded";
/// Event type identifier for [`PaymentRecorded`].
pub const PAYMENT_RECORDED_EVENT_TYPE: &str = "guest_stay.payment_recorded";
/// Event type identifier for [`GuestCheckedOut`].
pub const GUEST_CHECKED_OUT_EVENT_TYPE: &str = "guest_stay.checked_out";
/// Event type identifier for [`GuestCheckoutFailed`].
pub const GUEST_CHECKOUT_FAILED_EVENT_TYPE: &str = "guest_stay.checkout_failed";

/// Emitted when a guest checks in and the account opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCheckedIn {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// When the guest checked in.
    pub checked_in_at: DateTime<Utc>,
}

/// Emitted when a charge is posted to an open account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRecorded {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// The charge identifier.
    pub charge_id: Uuid,
    /// Amount in cents.
    pub amount: i64,
}

/// Emitted when a payment is posted to an open account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// The payment identifier.
    pub payment_id: Uuid,
    /// Amount in cents.
    pub amount: i64,
}

/// Emitted when a settled account is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCheckedOut {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// The group checkout that requested this checkout, if any.
    pub group_checkout_id: Option<Uuid>,
    /// When the guest checked out.
    pub checked_out_at: DateTime<Utc>,
}

/// Why a checkout was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutFailureReason {
    /// The account is not open (never checked in, or already checked out).
    NotOpen,
    /// Charges and payments do not cancel out.
    BalanceNotSettled,
    /// The request could not be carried out, for instance because it kept
    /// racing other writes to the account.
    NotProcessed,
}

/// Emitted when a checkout request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCheckoutFailed {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// The group checkout that requested this checkout, if any.
    pub group_checkout_id: Option<Uuid>,
    /// Why the checkout was refused.
    pub reason: CheckoutFailureReason,
    /// When the checkout was refused.
    pub failed_at: DateTime<Utc>,
}

/// Event payload variants for the Guest Stay context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestStayEventKind {
    /// The guest has checked in.
    GuestCheckedIn(GuestCheckedIn),
    /// A charge has been recorded.
    ChargeRecorded(ChargeRecorded),
    /// A payment has been recorded.
    PaymentRecorded(PaymentRecorded),
    /// The guest has checked out.
    GuestCheckedOut(GuestCheckedOut),
    /// A checkout was refused.
    GuestCheckoutFailed(GuestCheckoutFailed),
}

impl GuestStayEventKind {
    /// The stored event type name for this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GuestCheckedIn(_) => GUEST_CHECKED_IN_EVENT_TYPE,
            Self::ChargeRecorded(_) => CHARGE_RECORDED_EVENT_TYPE,
            Self::PaymentRecorded(_) => PAYMENT_RECORDED_EVENT_TYPE,
            Self::GuestCheckedOut(_) => GUEST_CHECKED_OUT_EVENT_TYPE,
            Self::GuestCheckoutFailed(_) => GUEST_CHECKOUT_FAILED_EVENT_TYPE,
        }
    }

    /// The payload as stored: the variant's fields, without an enum tag.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        // Derived Serialize impls over plain fields cannot fail.
        let payload = match self {
            Self::GuestCheckedIn(e) => serde_json::to_value(e),
            Self::ChargeRecorded(e) => serde_json::to_value(e),
            Self::PaymentRecorded(e) => serde_json::to_value(e),
            Self::GuestCheckedOut(e) => serde_json::to_value(e),
            Self::GuestCheckoutFailed(e) => serde_json::to_value(e),
        };
        payload.unwrap_or_default()
    }
}

/// The decoders for every guest stay event type.
pub fn registry() -> &'static EventTypeRegistry<GuestStayEventKind> {
    static REGISTRY: OnceLock<EventTypeRegistry<GuestStayEventKind>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        EventTypeRegistry::new()
            .register(GUEST_CHECKED_IN_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GuestStayEventKind::GuestCheckedIn)
            })
            .register(CHARGE_RECORDED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GuestStayEventKind::ChargeRecorded)
            })
            .register(PAYMENT_RECORDED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GuestStayEventKind::PaymentRecorded)
            })
            .register(GUEST_CHECKED_OUT_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GuestStayEventKind::GuestCheckedOut)
            })
            .register(GUEST_CHECKOUT_FAILED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GuestStayEventKind::GuestCheckoutFailed)
            })
    })
}

/// Domain event envelope for the Guest Stay context.
#[derive(Debug, Clone)]
pub struct GuestStayEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: GuestStayEventKind,
}

impl DomainEvent for GuestStayEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        self.kind.to_payload()
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
