//! In-process delivery of scheduled guest checkouts.

use std::sync::Arc;

use async_trait::async_trait;
use stayline_core::aggregate::AggregateRoot;
use stayline_core::aggregate_store::AggregateStore;
use stayline_core::clock::Clock;
use stayline_core::command::CommandBus;
use stayline_core::concurrency::ConcurrencyContext;
use stayline_core::error::DomainError;
use stayline_core::event_log::{EventLog, ExpectedVersion};
use stayline_guest_stay::application::command_handlers::{self, CheckOutResult};
use stayline_guest_stay::domain::aggregates::GuestStayAccount;
use stayline_guest_stay::domain::commands::CheckOutGuest;
use tracing::{Instrument, error, info_span, warn};

const MAX_CONFLICT_RETRIES: u32 = 5;

/// Runs each scheduled `CheckOutGuest` on its own task.
///
/// The account is read first and its version used as the expected version,
/// so a checkout that races another write is re-evaluated against the new
/// state rather than appended blindly. A group member whose checkout cannot
/// be carried out still gets a `checkout_failed` event, so the group always
/// learns an outcome.
#[derive(Clone)]
pub struct InProcessCheckoutBus {
    event_log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InProcessCheckoutBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessCheckoutBus").finish_non_exhaustive()
    }
}

impl InProcessCheckoutBus {
    /// Creates a bus writing through `event_log`.
    #[must_use]
    pub fn new(event_log: Arc<dyn EventLog>, clock: Arc<dyn Clock>) -> Self {
        Self { event_log, clock }
    }

    /// Executes `command` now, retrying on concurrency conflicts.
    ///
    /// # Errors
    ///
    /// Returns the handler's error once retries are exhausted, or
    /// immediately for anything other than a conflict.
    pub async fn execute(&self, command: &CheckOutGuest) -> Result<CheckOutResult, DomainError> {
        let mut attempt = 1;
        loop {
            let context = ConcurrencyContext::new();
            let store = AggregateStore::<GuestStayAccount>::new(Arc::clone(&self.event_log))
                .with_concurrency_context(context.clone());
            let account = store
                .find(command.guest_stay_id)
                .await?
                .ok_or(DomainError::AggregateNotFound(command.guest_stay_id))?;
            context.set_expected_version(account.version());

            match command_handlers::handle_check_out_guest(command, self.clock.as_ref(), &store)
                .await
            {
                Err(e) if e.is_concurrency_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    warn!(attempt, error = %e, "checkout raced another write, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Executes `command`. When that fails for a member of a group checkout,
    /// the failure is recorded on the account instead.
    pub async fn deliver(&self, command: &CheckOutGuest) {
        let Err(e) = self.execute(command).await else {
            return;
        };
        error!(error = %e, "scheduled checkout failed");
        if command.group_checkout_id.is_none() {
            return;
        }
        match self.record_unprocessed(command).await {
            Ok(()) => warn!("recorded the failed checkout for its group"),
            Err(e) => error!(error = %e, "could not record the failed checkout"),
        }
    }

    /// Appends a `checkout_failed` event for a checkout that could not be
    /// carried out. The refusal leaves the account unchanged, so it is
    /// appended without a version check.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` for an unknown account, or
    /// any store failure.
    pub async fn record_unprocessed(&self, command: &CheckOutGuest) -> Result<(), DomainError> {
        let store = AggregateStore::<GuestStayAccount>::new(Arc::clone(&self.event_log))
            .require_expected_version(false);
        let mut account = store
            .find(command.guest_stay_id)
            .await?
            .ok_or(DomainError::AggregateNotFound(command.guest_stay_id))?;
        account.record_unprocessed_checkout(
            command.group_checkout_id,
            command.correlation_id,
            self.clock.as_ref(),
        );
        store.update(&mut account, ExpectedVersion::Any).await?;
        Ok(())
    }
}

#[async_trait]
impl CommandBus<CheckOutGuest> for InProcessCheckoutBus {
    async fn schedule(&self, command: CheckOutGuest) -> Result<(), DomainError> {
        let bus = self.clone();
        let span = info_span!(
            "scheduled_checkout",
            guest_stay_id = %command.guest_stay_id,
            group_checkout_id = ?command.group_checkout_id,
            correlation_id = %command.correlation_id,
        );
        tokio::spawn(async move { bus.deliver(&command).await }.instrument(span));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stayline_core::event_log::{EventFilter, EventStream, RecordedEvent, StoredEvent};
    use stayline_guest_stay::domain::aggregates::CheckoutOutcome;
    use stayline_guest_stay::domain::commands::{CheckInGuest, RecordCharge};
    use stayline_guest_stay::domain::events::{
        CheckoutFailureReason, GUEST_CHECKED_OUT_EVENT_TYPE, GUEST_CHECKOUT_FAILED_EVENT_TYPE,
    };
    use stayline_test_support::{FixedClock, InMemoryEventLog};
    use uuid::Uuid;

    use super::*;

    async fn checked_in(log: &Arc<InMemoryEventLog>, clock: &FixedClock) -> Uuid {
        let guest_stay_id = Uuid::new_v4();
        let store = AggregateStore::<GuestStayAccount>::new(log.clone());
        command_handlers::handle_check_in_guest(
            &CheckInGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
            },
            clock,
            &store,
        )
        .await
        .unwrap();
        guest_stay_id
    }

    /// An in-memory log that rejects the next `conflicts` appends as if
    /// another writer kept getting there first.
    struct ContendedLog {
        inner: Arc<InMemoryEventLog>,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl EventLog for ContendedLog {
        async fn read_stream(&self, stream_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
            self.inner.read_stream(stream_id).await
        }

        async fn append_to_stream(
            &self,
            stream_id: Uuid,
            expected: ExpectedVersion,
            events: &[StoredEvent],
        ) -> Result<i64, DomainError> {
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                let actual = i64::try_from(self.inner.read_stream(stream_id).await?.len()).unwrap();
                return Err(DomainError::ConcurrencyConflict {
                    stream_id,
                    expected,
                    actual,
                });
            }
            self.inner.append_to_stream(stream_id, expected, events).await
        }

        async fn read_all(
            &self,
            after: Option<i64>,
            limit: usize,
        ) -> Result<Vec<RecordedEvent>, DomainError> {
            self.inner.read_all(after, limit).await
        }

        fn subscribe_to_all(&self, after: Option<i64>, filter: EventFilter) -> EventStream<'_> {
            self.inner.subscribe_to_all(after, filter)
        }
    }

    fn contended_bus(log: &Arc<InMemoryEventLog>) -> InProcessCheckoutBus {
        InProcessCheckoutBus::new(
            Arc::new(ContendedLog {
                inner: log.clone(),
                conflicts: AtomicUsize::new(MAX_CONFLICT_RETRIES as usize),
            }),
            Arc::new(FixedClock::standard()),
        )
    }

    fn bus(log: &Arc<InMemoryEventLog>) -> InProcessCheckoutBus {
        InProcessCheckoutBus::new(log.clone(), Arc::new(FixedClock::standard()))
    }

    #[tokio::test]
    async fn test_execute_checks_out_settled_account_with_group_id() {
        // Arrange
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log, &FixedClock::standard()).await;
        let group_checkout_id = Uuid::new_v4();

        // Act
        let result = bus(&log)
            .execute(&CheckOutGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                group_checkout_id: Some(group_checkout_id),
            })
            .await
            .unwrap();

        // Assert
        assert_eq!(result.outcome, CheckoutOutcome::CheckedOut);
        assert_eq!(result.next_version, 2);
        let events = log.read_stream(guest_stay_id).await.unwrap();
        assert_eq!(events[1].event_type, GUEST_CHECKED_OUT_EVENT_TYPE);
        assert_eq!(
            events[1].payload["group_checkout_id"],
            group_checkout_id.to_string()
        );
    }

    #[tokio::test]
    async fn test_execute_records_refusal_for_unsettled_account() {
        // Arrange
        let log = Arc::new(InMemoryEventLog::new());
        let clock = FixedClock::standard();
        let guest_stay_id = checked_in(&log, &clock).await;
        let store =
            AggregateStore::<GuestStayAccount>::new(log.clone()).require_expected_version(false);
        command_handlers::handle_record_charge(
            &RecordCharge {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                amount: 1500,
            },
            &clock,
            &store,
        )
        .await
        .unwrap();

        // Act
        let result = bus(&log)
            .execute(&CheckOutGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                group_checkout_id: None,
            })
            .await
            .unwrap();

        // Assert
        assert!(matches!(result.outcome, CheckoutOutcome::Failed(_)));
        let events = log.read_stream(guest_stay_id).await.unwrap();
        assert_eq!(events[2].event_type, GUEST_CHECKOUT_FAILED_EVENT_TYPE);
    }

    #[tokio::test]
    async fn test_execute_unknown_account_is_not_found() {
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = Uuid::new_v4();

        let result = bus(&log)
            .execute(&CheckOutGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                group_checkout_id: None,
            })
            .await;

        match result {
            Err(DomainError::AggregateNotFound(id)) => assert_eq!(id, guest_stay_id),
            other => panic!("expected AggregateNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deliver_records_failure_for_group_member_when_retries_run_out() {
        // Arrange
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log, &FixedClock::standard()).await;
        let group_checkout_id = Uuid::new_v4();

        // Act
        contended_bus(&log)
            .deliver(&CheckOutGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                group_checkout_id: Some(group_checkout_id),
            })
            .await;

        // Assert
        let events = log.read_stream(guest_stay_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, GUEST_CHECKOUT_FAILED_EVENT_TYPE);
        assert_eq!(
            events[1].payload["group_checkout_id"],
            group_checkout_id.to_string()
        );
        assert_eq!(
            events[1].payload["reason"],
            serde_json::json!(CheckoutFailureReason::NotProcessed)
        );
    }

    #[tokio::test]
    async fn test_deliver_without_group_records_nothing_when_retries_run_out() {
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log, &FixedClock::standard()).await;

        contended_bus(&log)
            .deliver(&CheckOutGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                group_checkout_id: None,
            })
            .await;

        assert_eq!(log.read_stream(guest_stay_id).await.unwrap().len(), 1);
    }
}
