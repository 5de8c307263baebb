//! Events published by the Group Checkout process manager.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stayline_core::event::EventTypeRegistry;
use stayline_core::event_log::StoredEvent;
use uuid::Uuid;

/// Event type identifier for [`GroupCheckoutInitiated`].
pub const GROUP_CHECKOUT_INITIATED_EVENT_TYPE: &str = "group_checkout.initiated";
/// Event type identifier for [`GuestCheckoutCompleted`].
pub const GUEST_CHECKOUT_COMPLETED_EVENT_TYPE: &str = "group_checkout.guest_checkout_completed";
/// Event type identifier for [`GuestCheckoutFailed`].
pub const GUEST_CHECKOUT_FAILED_EVENT_TYPE: &str = "group_checkout.guest_checkout_failed";
/// Event type identifier for [`GroupCheckoutCompleted`].
pub const GROUP_CHECKOUT_COMPLETED_EVENT_TYPE: &str = "group_checkout.completed";
/// Event type identifier for [`GroupCheckoutFailed`].
pub const GROUP_CHECKOUT_FAILED_EVENT_TYPE: &str = "group_checkout.failed";

/// Emitted when a clerk starts a group checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheckoutInitiated {
    /// The group checkout identifier.
    pub group_checkout_id: Uuid,
    /// The clerk who requested it.
    pub clerk_id: Uuid,
    /// Every guest stay in the group.
    pub guest_stay_ids: Vec<Uuid>,
    /// When the checkout started.
    pub initiated_at: DateTime<Utc>,
}

/// Emitted when one member of the group checked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCheckoutCompleted {
    /// The group checkout identifier.
    pub group_checkout_id: Uuid,
    /// The guest stay that checked out.
    pub guest_stay_id: Uuid,
    /// When the outcome was recorded.
    pub completed_at: DateTime<Utc>,
}

/// Emitted when one member of the group could not check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCheckoutFailed {
    /// The group checkout identifier.
    pub group_checkout_id: Uuid,
    /// The guest stay whose checkout was refused.
    pub guest_stay_id: Uuid,
    /// When the outcome was recorded.
    pub failed_at: DateTime<Utc>,
}

/// Emitted once, when every member checked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheckoutCompleted {
    /// The group checkout identifier.
    pub group_checkout_id: Uuid,
    /// Every guest stay in the group.
    pub completed_checkouts: Vec<Uuid>,
    /// When the group finished.
    pub completed_at: DateTime<Utc>,
}

/// Emitted once, when every member has an outcome and at least one failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCheckoutFailed {
    /// The group checkout identifier.
    pub group_checkout_id: Uuid,
    /// Members that did check out.
    pub completed_checkouts: Vec<Uuid>,
    /// Members whose checkout was refused.
    pub failed_checkouts: Vec<Uuid>,
    /// When the group finished.
    pub failed_at: DateTime<Utc>,
}

/// Event payload variants for the Group Checkout context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCheckoutEventKind {
    /// A group checkout started.
    GroupCheckoutInitiated(GroupCheckoutInitiated),
    /// A member checked out.
    GuestCheckoutCompleted(GuestCheckoutCompleted),
    /// A member's checkout was refused.
    GuestCheckoutFailed(GuestCheckoutFailed),
    /// The whole group checked out.
    GroupCheckoutCompleted(GroupCheckoutCompleted),
    /// The group finished with at least one refusal.
    GroupCheckoutFailed(GroupCheckoutFailed),
}

impl GroupCheckoutEventKind {
    /// The stored event type name for this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GroupCheckoutInitiated(_) => GROUP_CHECKOUT_INITIATED_EVENT_TYPE,
            Self::GuestCheckoutCompleted(_) => GUEST_CHECKOUT_COMPLETED_EVENT_TYPE,
            Self::GuestCheckoutFailed(_) => GUEST_CHECKOUT_FAILED_EVENT_TYPE,
            Self::GroupCheckoutCompleted(_) => GROUP_CHECKOUT_COMPLETED_EVENT_TYPE,
            Self::GroupCheckoutFailed(_) => GROUP_CHECKOUT_FAILED_EVENT_TYPE,
        }
    }

    /// The payload as stored: the variant's fields, without an enum tag.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        // Derived Serialize impls over plain fields cannot fail.
        let payload = match self {
            Self::GroupCheckoutInitiated(e) => serde_json::to_value(e),
            Self::GuestCheckoutCompleted(e) => serde_json::to_value(e),
            Self::GuestCheckoutFailed(e) => serde_json::to_value(e),
            Self::GroupCheckoutCompleted(e) => serde_json::to_value(e),
            Self::GroupCheckoutFailed(e) => serde_json::to_value(e),
        };
        payload.unwrap_or_default()
    }

    /// Wraps the event for appending to the group's stream. The log stamps
    /// the sequence number.
    #[must_use]
    pub fn to_stored(
        &self,
        group_checkout_id: Uuid,
        correlation_id: Uuid,
        causation_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::now_v7(),
            aggregate_id: group_checkout_id,
            event_type: self.event_type().to_owned(),
            payload: self.to_payload(),
            sequence_number: 0,
            correlation_id,
            causation_id,
            occurred_at,
        }
    }
}

/// The decoders for every group checkout event type.
pub fn registry() -> &'static EventTypeRegistry<GroupCheckoutEventKind> {
    static REGISTRY: OnceLock<EventTypeRegistry<GroupCheckoutEventKind>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        EventTypeRegistry::new()
            .register(GROUP_CHECKOUT_INITIATED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GroupCheckoutEventKind::GroupCheckoutInitiated)
            })
            .register(GUEST_CHECKOUT_COMPLETED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GroupCheckoutEventKind::GuestCheckoutCompleted)
            })
            .register(GUEST_CHECKOUT_FAILED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GroupCheckoutEventKind::GuestCheckoutFailed)
            })
            .register(GROUP_CHECKOUT_COMPLETED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GroupCheckoutEventKind::GroupCheckoutCompleted)
            })
            .register(GROUP_CHECKOUT_FAILED_EVENT_TYPE, |v| {
                serde_json::from_value(v).map(GroupCheckoutEventKind::GroupCheckoutFailed)
            })
    })
}
