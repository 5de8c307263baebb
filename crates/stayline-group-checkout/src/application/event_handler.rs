//! Reacts to guest checkout outcomes on behalf of running group checkouts.

use std::sync::Arc;

use async_trait::async_trait;
use stayline_core::clock::Clock;
use stayline_core::document::{DocumentStore, NetOperation, Versioned};
use stayline_core::error::DomainError;
use stayline_core::event_log::{EventFilter, EventLog, ExpectedVersion, RecordedEvent, StoredEvent};
use stayline_guest_stay::domain::events::{
    GUEST_CHECKED_OUT_EVENT_TYPE, GUEST_CHECKOUT_FAILED_EVENT_TYPE, GuestStayEventKind, registry,
};
use stayline_subscriptions::EventHandler;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::events::{GroupCheckoutEventKind, registry as group_registry};
use crate::domain::process_manager::{GroupCheckout, MemberOutcome};

/// Handler name, also used as the subscription's checkpoint key.
pub const GROUP_CHECKOUT_HANDLER_NAME: &str = "group_checkout";

/// The guest stay events this handler reacts to.
#[must_use]
pub fn subscription_filter() -> EventFilter {
    EventFilter::default()
        .with_event_types([GUEST_CHECKED_OUT_EVENT_TYPE, GUEST_CHECKOUT_FAILED_EVENT_TYPE])
}

/// Feeds `guest_stay.checked_out` / `guest_stay.checkout_failed` events that
/// carry a group id into the matching [`GroupCheckout`].
///
/// Decided events are appended to the group's stream at the version the
/// stored state expects, then the state is committed together with the
/// position of the outcome. A redelivered outcome is skipped by position.
/// If an earlier attempt published but failed to commit, the append
/// conflicts and the state is rebuilt from the stream instead, so nothing is
/// published twice.
pub struct GroupCheckoutHandler {
    checkouts: Arc<dyn DocumentStore<GroupCheckout>>,
    log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for GroupCheckoutHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCheckoutHandler").finish_non_exhaustive()
    }
}

impl GroupCheckoutHandler {
    /// Creates a handler over the process manager state and the event log.
    #[must_use]
    pub fn new(
        checkouts: Arc<dyn DocumentStore<GroupCheckout>>,
        log: Arc<dyn EventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            checkouts,
            log,
            clock,
        }
    }

    #[instrument(skip_all, fields(position = event.position, event_type = event.event_type()))]
    async fn handle_one(&self, event: &RecordedEvent) -> Result<(), DomainError> {
        let Some((group_checkout_id, guest_stay_id, outcome)) = group_outcome(event)? else {
            return Ok(());
        };
        let Some(Versioned {
            document: checkout,
            last_position,
        }) = self.checkouts.get(group_checkout_id).await?
        else {
            debug!(%group_checkout_id, "no such group checkout, ignoring outcome");
            return Ok(());
        };
        if event.position <= last_position {
            debug!(%group_checkout_id, last_position, "outcome already folded, skipping");
            return Ok(());
        }

        let (checkout, published) = match self
            .decide_and_publish(checkout, guest_stay_id, outcome, event)
            .await
        {
            Err(DomainError::ConcurrencyConflict { expected, actual, .. }) => {
                warn!(
                    %group_checkout_id,
                    %expected,
                    actual,
                    "group stream is ahead of the stored state, rebuilding"
                );
                let rebuilt = self.rebuild(group_checkout_id).await?;
                self.decide_and_publish(rebuilt, guest_stay_id, outcome, event)
                    .await?
            }
            result => result?,
        };

        let status = checkout.status;
        self.checkouts
            .commit(vec![NetOperation::Update {
                id: group_checkout_id,
                document: Versioned {
                    document: checkout,
                    last_position: event.position,
                },
            }])
            .await?;

        info!(
            %group_checkout_id,
            %guest_stay_id,
            ?outcome,
            ?status,
            published,
            "group checkout advanced"
        );
        Ok(())
    }

    /// Folds the outcome into `checkout` and appends whatever it decides,
    /// expecting the group stream to be exactly where `checkout` left it.
    async fn decide_and_publish(
        &self,
        mut checkout: GroupCheckout,
        guest_stay_id: Uuid,
        outcome: MemberOutcome,
        event: &RecordedEvent,
    ) -> Result<(GroupCheckout, usize), DomainError> {
        let expected = ExpectedVersion::Exact(checkout.stream_version);
        let now = self.clock.now();
        let decided = checkout.record_outcome(guest_stay_id, outcome, now);
        if decided.is_empty() {
            debug!(group_checkout_id = %checkout.id, %guest_stay_id, "outcome changes nothing");
            return Ok((checkout, 0));
        }

        let stored: Vec<StoredEvent> = decided
            .iter()
            .map(|kind| {
                kind.to_stored(
                    checkout.id,
                    event.event.correlation_id,
                    event.event.event_id,
                    now,
                )
            })
            .collect();
        checkout.stream_version = self
            .log
            .append_to_stream(checkout.id, expected, &stored)
            .await?;
        Ok((checkout, stored.len()))
    }

    async fn rebuild(&self, group_checkout_id: Uuid) -> Result<GroupCheckout, DomainError> {
        let history = self
            .log
            .read_stream(group_checkout_id)
            .await?
            .iter()
            .map(|stored| group_registry().decode(&stored.event_type, &stored.payload))
            .collect::<Result<Vec<GroupCheckoutEventKind>, _>>()?;
        GroupCheckout::replay(&history)
    }
}

/// Extracts `(group, guest stay, outcome)` from a guest checkout event that
/// belongs to a group checkout.
fn group_outcome(
    event: &RecordedEvent,
) -> Result<Option<(Uuid, Uuid, MemberOutcome)>, DomainError> {
    let outcome = match registry().try_decode(event.event_type(), &event.event.payload)? {
        Some(GuestStayEventKind::GuestCheckedOut(e)) => e
            .group_checkout_id
            .map(|group| (group, e.guest_stay_id, MemberOutcome::Completed)),
        Some(GuestStayEventKind::GuestCheckoutFailed(e)) => e
            .group_checkout_id
            .map(|group| (group, e.guest_stay_id, MemberOutcome::Failed)),
        _ => None,
    };
    Ok(outcome)
}

#[async_trait]
impl EventHandler for GroupCheckoutHandler {
    fn name(&self) -> &str {
        GROUP_CHECKOUT_HANDLER_NAME
    }

    async fn handle(&self, events: &[RecordedEvent]) -> Result<(), DomainError> {
        for event in events {
            self.handle_one(event).await?;
        }
        Ok(())
    }
}
