//! Read model of guest stays that are currently open.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stayline_core::document::DocumentStore;
use stayline_subscriptions::ProjectionApplier;
use uuid::Uuid;

use crate::domain::events::{
    CHARGE_RECORDED_EVENT_TYPE, ChargeRecorded, GUEST_CHECKED_IN_EVENT_TYPE,
    GUEST_CHECKED_OUT_EVENT_TYPE, GuestCheckedIn, GuestCheckedOut, PAYMENT_RECORDED_EVENT_TYPE,
    PaymentRecorded,
};

/// Document kind under which open stays are stored.
pub const OPEN_GUEST_STAYS_KIND: &str = "open_guest_stays";

/// One open guest stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenGuestStay {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// Charges minus payments, in cents.
    pub balance: i64,
    /// Number of charges posted.
    pub charges_count: u32,
    /// Number of payments posted.
    pub payments_count: u32,
    /// When the guest checked in.
    pub opened_at: DateTime<Utc>,
}

/// Builds the projection: created on check-in, updated by charges and
/// payments, removed on checkout.
#[must_use]
pub fn open_guest_stays_projection(
    store: Arc<dyn DocumentStore<OpenGuestStay>>,
) -> ProjectionApplier<OpenGuestStay> {
    ProjectionApplier::new(OPEN_GUEST_STAYS_KIND, store)
        .creates(
            GUEST_CHECKED_IN_EVENT_TYPE,
            |e: &GuestCheckedIn| e.guest_stay_id,
            |e, _| OpenGuestStay {
                guest_stay_id: e.guest_stay_id,
                balance: 0,
                charges_count: 0,
                payments_count: 0,
                opened_at: e.checked_in_at,
            },
        )
        .projects(
            CHARGE_RECORDED_EVENT_TYPE,
            |e: &ChargeRecorded| e.guest_stay_id,
            |e, stay: &mut OpenGuestStay| {
                stay.balance += e.amount;
                stay.charges_count += 1;
            },
        )
        .projects(
            PAYMENT_RECORDED_EVENT_TYPE,
            |e: &PaymentRecorded| e.guest_stay_id,
            |e, stay: &mut OpenGuestStay| {
                stay.balance -= e.amount;
                stay.payments_count += 1;
            },
        )
        .deletes(GUEST_CHECKED_OUT_EVENT_TYPE, |e: &GuestCheckedOut| {
            e.guest_stay_id
        })
}
