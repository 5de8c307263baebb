//! Aggregate roots for the Guest Stay context.

use chrono::{DateTime, Utc};
use serde::Serialize;
use stayline_core::aggregate::AggregateRoot;
use stayline_core::clock::Clock;
use stayline_core::error::DomainError;
use stayline_core::event::EventMetadata;
use stayline_core::event_log::StoredEvent;
use uuid::Uuid;

use super::events::{
    ChargeRecorded, CheckoutFailureReason, GuestCheckedIn, GuestCheckedOut, GuestCheckoutFailed,
    GuestStayEvent, GuestStayEventKind, PaymentRecorded, registry,
};

/// Lifecycle of a guest stay account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestStayStatus {
    /// Charges and payments may be posted.
    Open,
    /// The account is closed.
    CheckedOut,
}

/// What a checkout request produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// The account was closed.
    CheckedOut,
    /// The request was refused and a `checkout_failed` event recorded.
    Failed(CheckoutFailureReason),
}

/// The aggregate root for a guest's account during a stay.
#[derive(Debug)]
pub struct GuestStayAccount {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Current version (event count, including uncommitted events).
    pub(crate) version: i64,
    /// `None` until the guest checks in.
    pub(crate) status: Option<GuestStayStatus>,
    /// Charges minus payments, in cents.
    pub(crate) balance: i64,
    pub(crate) checked_in_at: Option<DateTime<Utc>>,
    /// Uncommitted events pending persistence.
    uncommitted_events: Vec<GuestStayEvent>,
}

impl GuestStayAccount {
    /// Opens a new account, producing a `GuestCheckedIn` event.
    #[must_use]
    pub fn check_in(id: Uuid, correlation_id: Uuid, clock: &dyn Clock) -> Self {
        let mut account = Self::empty(id);
        let checked_in_at = clock.now();
        account.record(
            GuestStayEventKind::GuestCheckedIn(GuestCheckedIn {
                guest_stay_id: id,
                checked_in_at,
            }),
            correlation_id,
            clock,
        );
        account
    }

    /// The account status, `None` if the guest never checked in.
    #[must_use]
    pub fn status(&self) -> Option<GuestStayStatus> {
        self.status
    }

    /// Charges minus payments, in cents.
    #[must_use]
    pub fn balance(&self) -> i64 {
        self.balance
    }

    /// When the guest checked in.
    #[must_use]
    pub fn checked_in_at(&self) -> Option<DateTime<Utc>> {
        self.checked_in_at
    }

    /// Posts a charge, producing a `ChargeRecorded` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the amount is not positive or the
    /// account is not open.
    pub fn record_charge(
        &mut self,
        amount: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_postable(amount, "charge")?;
        self.record(
            GuestStayEventKind::ChargeRecorded(ChargeRecorded {
                guest_stay_id: self.id,
                charge_id: Uuid::now_v7(),
                amount,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Posts a payment, producing a `PaymentRecorded` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the amount is not positive or the
    /// account is not open.
    pub fn record_payment(
        &mut self,
        amount: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_postable(amount, "payment")?;
        self.record(
            GuestStayEventKind::PaymentRecorded(PaymentRecorded {
                guest_stay_id: self.id,
                payment_id: Uuid::now_v7(),
                amount,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Closes the account if it is open and settled. A refused checkout is
    /// recorded as a `GuestCheckoutFailed` event rather than returned as an
    /// error, so that a coordinating group checkout learns the outcome.
    pub fn check_out(
        &mut self,
        group_checkout_id: Option<Uuid>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> CheckoutOutcome {
        let now = clock.now();
        let refusal = if self.status != Some(GuestStayStatus::Open) {
            Some(CheckoutFailureReason::NotOpen)
        } else if self.balance != 0 {
            Some(CheckoutFailureReason::BalanceNotSettled)
        } else {
            None
        };

        match refusal {
            Some(reason) => {
                self.record(
                    GuestStayEventKind::GuestCheckoutFailed(GuestCheckoutFailed {
                        guest_stay_id: self.id,
                        group_checkout_id,
                        reason,
                        failed_at: now,
                    }),
                    correlation_id,
                    clock,
                );
                CheckoutOutcome::Failed(reason)
            }
            None => {
                self.record(
                    GuestStayEventKind::GuestCheckedOut(GuestCheckedOut {
                        guest_stay_id: self.id,
                        group_checkout_id,
                        checked_out_at: now,
                    }),
                    correlation_id,
                    clock,
                );
                CheckoutOutcome::CheckedOut
            }
        }
    }

    /// Records that a requested checkout could not be carried out at all.
    /// The account itself is left as it is.
    pub fn record_unprocessed_checkout(
        &mut self,
        group_checkout_id: Option<Uuid>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) {
        self.record(
            GuestStayEventKind::GuestCheckoutFailed(GuestCheckoutFailed {
                guest_stay_id: self.id,
                group_checkout_id,
                reason: CheckoutFailureReason::NotProcessed,
                failed_at: clock.now(),
            }),
            correlation_id,
            clock,
        );
    }

    fn ensure_postable(&self, amount: i64, what: &str) -> Result<(), DomainError> {
        if amount <= 0 {
            return Err(DomainError::Validation(format!(
                "{what} amount must be positive, got {amount}"
            )));
        }
        if self.status != Some(GuestStayStatus::Open) {
            return Err(DomainError::Validation(format!(
                "guest stay {} is not open",
                self.id
            )));
        }
        Ok(())
    }

    fn record(&mut self, kind: GuestStayEventKind, correlation_id: Uuid, clock: &dyn Clock) {
        let event = GuestStayEvent {
            metadata: EventMetadata {
                event_id: Uuid::now_v7(),
                event_type: kind.event_type().to_owned(),
                aggregate_id: self.id,
                sequence_number: self.version + 1,
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        self.apply(&event);
        self.uncommitted_events.push(event);
    }
}

impl AggregateRoot for GuestStayAccount {
    type Event = GuestStayEvent;

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            status: None,
            balance: 0,
            checked_in_at: None,
            uncommitted_events: Vec::new(),
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        match &event.kind {
            GuestStayEventKind::GuestCheckedIn(e) => {
                self.status = Some(GuestStayStatus::Open);
                self.checked_in_at = Some(e.checked_in_at);
            }
            GuestStayEventKind::ChargeRecorded(e) => self.balance += e.amount,
            GuestStayEventKind::PaymentRecorded(e) => self.balance -= e.amount,
            GuestStayEventKind::GuestCheckedOut(_) => {
                self.status = Some(GuestStayStatus::CheckedOut);
            }
            GuestStayEventKind::GuestCheckoutFailed(_) => {}
        }
        self.version += 1;
    }

    fn decode_event(stored: &StoredEvent) -> Result<Self::Event, DomainError> {
        Ok(GuestStayEvent {
            metadata: stored.metadata(),
            kind: registry().decode(&stored.event_type, &stored.payload)?,
        })
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }
}
