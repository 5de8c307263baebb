//! Command handlers for the Guest Stay context.
//!
//! Each handler loads the account through the `AggregateStore`, runs the
//! command method and appends the resulting events. Expected versions come
//! from the store's concurrency context, never from the command.

use stayline_core::aggregate_store::AggregateStore;
use stayline_core::clock::Clock;
use stayline_core::error::DomainError;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{CheckoutOutcome, GuestStayAccount};
use crate::domain::commands::{CheckInGuest, CheckOutGuest, RecordCharge, RecordPayment};

/// Result of a successfully handled command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestStayCommandResult {
    /// The aggregate ID affected by the command.
    pub guest_stay_id: Uuid,
    /// The stream version after the append.
    pub next_version: i64,
}

/// Result of a handled checkout. A refused checkout is still a success at
/// this level: the refusal has been recorded as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutResult {
    /// The aggregate ID affected by the command.
    pub guest_stay_id: Uuid,
    /// The stream version after the append.
    pub next_version: i64,
    /// Whether the account was closed or the checkout refused.
    pub outcome: CheckoutOutcome,
}

/// Handles the `CheckInGuest` command by starting a new stream.
///
/// # Errors
///
/// Returns `DomainError::StreamAlreadyExists` if the id is already in use.
pub async fn handle_check_in_guest(
    command: &CheckInGuest,
    clock: &dyn Clock,
    store: &AggregateStore<GuestStayAccount>,
) -> Result<GuestStayCommandResult, DomainError> {
    let mut account =
        GuestStayAccount::check_in(command.guest_stay_id, command.correlation_id, clock);
    let next_version = store.create(&mut account).await?;
    Ok(GuestStayCommandResult {
        guest_stay_id: command.guest_stay_id,
        next_version,
    })
}

/// Handles the `RecordCharge` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound`, `DomainError::Validation` or a
/// concurrency error from the store.
pub async fn handle_record_charge(
    command: &RecordCharge,
    clock: &dyn Clock,
    store: &AggregateStore<GuestStayAccount>,
) -> Result<GuestStayCommandResult, DomainError> {
    let next_version = store
        .handle(command.guest_stay_id, |account| {
            account.record_charge(command.amount, command.correlation_id, clock)
        })
        .await?;
    Ok(GuestStayCommandResult {
        guest_stay_id: command.guest_stay_id,
        next_version,
    })
}

/// Handles the `RecordPayment` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound`, `DomainError::Validation` or a
/// concurrency error from the store.
pub async fn handle_record_payment(
    command: &RecordPayment,
    clock: &dyn Clock,
    store: &AggregateStore<GuestStayAccount>,
) -> Result<GuestStayCommandResult, DomainError> {
    let next_version = store
        .handle(command.guest_stay_id, |account| {
            account.record_payment(command.amount, command.correlation_id, clock)
        })
        .await?;
    Ok(GuestStayCommandResult {
        guest_stay_id: command.guest_stay_id,
        next_version,
    })
}

/// Handles the `CheckOutGuest` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` or a concurrency error from the
/// store.
pub async fn handle_check_out_guest(
    command: &CheckOutGuest,
    clock: &dyn Clock,
    store: &AggregateStore<GuestStayAccount>,
) -> Result<CheckOutResult, DomainError> {
    let mut outcome = None;
    let next_version = store
        .handle(command.guest_stay_id, |account| {
            outcome = Some(account.check_out(
                command.group_checkout_id,
                command.correlation_id,
                clock,
            ));
            Ok(())
        })
        .await?;
    let outcome = outcome
        .ok_or_else(|| DomainError::Infrastructure("checkout produced no outcome".to_owned()))?;

    if let CheckoutOutcome::Failed(reason) = outcome {
        info!(
            guest_stay_id = %command.guest_stay_id,
            group_checkout_id = ?command.group_checkout_id,
            ?reason,
            "checkout refused"
        );
    }
    Ok(CheckOutResult {
        guest_stay_id: command.guest_stay_id,
        next_version,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stayline_core::concurrency::ConcurrencyContext;
    use stayline_core::event_log::EventLog;
    use stayline_test_support::{FixedClock, InMemoryEventLog};

    use super::*;
    use crate::domain::events::{
        CHARGE_RECORDED_EVENT_TYPE, CheckoutFailureReason, GUEST_CHECKED_IN_EVENT_TYPE,
        GUEST_CHECKOUT_FAILED_EVENT_TYPE,
    };

    fn store_with(
        log: &Arc<InMemoryEventLog>,
        context: &ConcurrencyContext,
    ) -> AggregateStore<GuestStayAccount> {
        AggregateStore::new(log.clone()).with_concurrency_context(context.clone())
    }

    async fn checked_in(log: &Arc<InMemoryEventLog>) -> Uuid {
        let guest_stay_id = Uuid::new_v4();
        let context = ConcurrencyContext::new();
        handle_check_in_guest(
            &CheckInGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
            },
            &FixedClock::standard(),
            &store_with(log, &context),
        )
        .await
        .unwrap();
        guest_stay_id
    }

    #[tokio::test]
    async fn test_handle_check_in_guest_persists_checked_in_event() {
        // Arrange
        let log = Arc::new(InMemoryEventLog::new());
        let context = ConcurrencyContext::new();
        let command = CheckInGuest {
            correlation_id: Uuid::new_v4(),
            guest_stay_id: Uuid::new_v4(),
        };

        // Act
        let result = handle_check_in_guest(
            &command,
            &FixedClock::standard(),
            &store_with(&log, &context),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(result.next_version, 1);
        assert_eq!(context.next_etag().as_deref(), Some("W/\"1\""));
        let stored = log.read_stream(command.guest_stay_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].event_type, GUEST_CHECKED_IN_EVENT_TYPE);
        assert_eq!(stored[0].correlation_id, command.correlation_id);
        assert_eq!(stored[0].occurred_at, FixedClock::standard().0);
    }

    #[tokio::test]
    async fn test_handle_check_in_guest_twice_is_rejected() {
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log).await;

        let result = handle_check_in_guest(
            &CheckInGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
            },
            &FixedClock::standard(),
            &store_with(&log, &ConcurrencyContext::new()),
        )
        .await;

        assert!(matches!(result, Err(DomainError::StreamAlreadyExists(id)) if id == guest_stay_id));
    }

    #[tokio::test]
    async fn test_handle_record_charge_uses_expected_version_from_context() {
        // Arrange
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log).await;
        let context = ConcurrencyContext::from_if_match(Some("W/\"1\""));
        let command = RecordCharge {
            correlation_id: Uuid::new_v4(),
            guest_stay_id,
            amount: 4_500,
        };

        // Act
        let result =
            handle_record_charge(&command, &FixedClock::standard(), &store_with(&log, &context))
                .await
                .unwrap();

        // Assert
        assert_eq!(result.next_version, 2);
        assert_eq!(context.next_version(), Some(2));
        let stored = log.read_stream(guest_stay_id).await.unwrap();
        assert_eq!(stored[1].event_type, CHARGE_RECORDED_EVENT_TYPE);
        assert_eq!(stored[1].payload["amount"], 4_500);
    }

    #[tokio::test]
    async fn test_handle_record_payment_with_stale_version_conflicts() {
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log).await;
        let first = ConcurrencyContext::from_if_match(Some("1"));
        let stale = ConcurrencyContext::from_if_match(Some("1"));
        let command = RecordPayment {
            correlation_id: Uuid::new_v4(),
            guest_stay_id,
            amount: 100,
        };
        handle_record_payment(&command, &FixedClock::standard(), &store_with(&log, &first))
            .await
            .unwrap();

        let result =
            handle_record_payment(&command, &FixedClock::standard(), &store_with(&log, &stale))
                .await;

        match result {
            Err(DomainError::ConcurrencyConflict { actual, .. }) => assert_eq!(actual, 2),
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert_eq!(stale.next_version(), None);
    }

    #[tokio::test]
    async fn test_handle_record_charge_without_version_is_rejected() {
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log).await;

        let result = handle_record_charge(
            &RecordCharge {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                amount: 100,
            },
            &FixedClock::standard(),
            &store_with(&log, &ConcurrencyContext::new()),
        )
        .await;

        assert!(matches!(result, Err(DomainError::MissingExpectedVersion)));
    }

    #[tokio::test]
    async fn test_handle_record_charge_for_unknown_stay_is_not_found() {
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = Uuid::new_v4();

        let result = handle_record_charge(
            &RecordCharge {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                amount: 100,
            },
            &FixedClock::standard(),
            &store_with(&log, &ConcurrencyContext::from_if_match(Some("0"))),
        )
        .await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(id)) if id == guest_stay_id));
    }

    #[tokio::test]
    async fn test_handle_check_out_guest_with_balance_records_refusal() {
        // Arrange
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log).await;
        handle_record_charge(
            &RecordCharge {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                amount: 900,
            },
            &FixedClock::standard(),
            &store_with(&log, &ConcurrencyContext::from_if_match(Some("1"))),
        )
        .await
        .unwrap();
        let group_checkout_id = Uuid::new_v4();
        let store = AggregateStore::new(log.clone()).require_expected_version(false);

        // Act
        let result = handle_check_out_guest(
            &CheckOutGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                group_checkout_id: Some(group_checkout_id),
            },
            &FixedClock::standard(),
            &store,
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(
            result.outcome,
            CheckoutOutcome::Failed(CheckoutFailureReason::BalanceNotSettled)
        );
        assert_eq!(result.next_version, 3);
        let stored = log.read_stream(guest_stay_id).await.unwrap();
        assert_eq!(stored[2].event_type, GUEST_CHECKOUT_FAILED_EVENT_TYPE);
        assert_eq!(
            stored[2].payload["group_checkout_id"],
            serde_json::json!(group_checkout_id)
        );
    }

    #[tokio::test]
    async fn test_handle_check_out_guest_closes_settled_account() {
        let log = Arc::new(InMemoryEventLog::new());
        let guest_stay_id = checked_in(&log).await;
        let context = ConcurrencyContext::from_if_match(Some("W/\"1\""));

        let result = handle_check_out_guest(
            &CheckOutGuest {
                correlation_id: Uuid::new_v4(),
                guest_stay_id,
                group_checkout_id: None,
            },
            &FixedClock::standard(),
            &store_with(&log, &context),
        )
        .await
        .unwrap();

        assert_eq!(result.outcome, CheckoutOutcome::CheckedOut);
        assert_eq!(context.next_etag().as_deref(), Some("W/\"2\""));
    }
}
