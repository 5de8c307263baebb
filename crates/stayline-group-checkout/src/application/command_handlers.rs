//! Command handlers for the Group Checkout context.

use stayline_core::clock::Clock;
use stayline_core::command::CommandBus;
use stayline_core::document::{DocumentStore, NetOperation, Versioned};
use stayline_core::error::DomainError;
use stayline_core::event_log::{EventLog, ExpectedVersion, StoredEvent};
use stayline_guest_stay::domain::commands::CheckOutGuest;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::commands::InitiateGroupCheckout;
use crate::domain::events::{GroupCheckoutEventKind, registry};
use crate::domain::process_manager::GroupCheckout;

/// Handles the `InitiateGroupCheckout` command.
///
/// Publishes `group_checkout.initiated` to a new stream for the group (which
/// also guards against reusing the id), stores the process manager state and
/// then schedules one checkout per member.
///
/// Retrying the same command (same correlation id) after a partial failure
/// resumes it: a missing state document is rebuilt from the group's stream
/// and every member still waiting for an outcome is scheduled again.
///
/// # Errors
///
/// Returns `DomainError::Validation` for an empty or duplicated member list
/// or a guest stay that does not exist, `DomainError::StreamAlreadyExists`
/// if the group id was taken by another request, or any store or bus
/// failure.
#[instrument(
    skip_all,
    fields(
        group_checkout_id = %command.group_checkout_id,
        members = command.guest_stay_ids.len(),
    )
)]
pub async fn handle_initiate_group_checkout(
    command: &InitiateGroupCheckout,
    clock: &dyn Clock,
    checkouts: &dyn DocumentStore<GroupCheckout>,
    log: &dyn EventLog,
    bus: &dyn CommandBus<CheckOutGuest>,
) -> Result<GroupCheckout, DomainError> {
    let group_checkout_id = command.group_checkout_id;
    let now = clock.now();
    let initiation = GroupCheckout::initiate(command, now)?;

    let checkout = if let Some(existing) = checkouts.get(group_checkout_id).await? {
        published_history(command, log).await?;
        warn!("group checkout already stored, resuming scheduling");
        existing.document
    } else {
        ensure_members_exist(&command.guest_stay_ids, log).await?;

        let stored: Vec<StoredEvent> = initiation
            .events
            .iter()
            .map(|event| {
                event.to_stored(
                    group_checkout_id,
                    command.correlation_id,
                    command.correlation_id,
                    now,
                )
            })
            .collect();
        let checkout = match log
            .append_to_stream(group_checkout_id, ExpectedVersion::NoStream, &stored)
            .await
        {
            Ok(_) => initiation.checkout,
            Err(DomainError::StreamAlreadyExists(_)) => {
                let history = published_history(command, log).await?;
                warn!("group stream published without state, rebuilding it");
                GroupCheckout::replay(&history)?
            }
            Err(e) => return Err(e),
        };

        checkouts
            .commit(vec![NetOperation::Insert {
                id: group_checkout_id,
                document: Versioned {
                    document: checkout.clone(),
                    last_position: 0,
                },
            }])
            .await?;
        checkout
    };

    for checkout_command in checkout.pending_commands(command.correlation_id) {
        bus.schedule(checkout_command).await?;
    }

    info!("group checkout initiated");
    Ok(checkout)
}

/// Loads the group's published events, provided they were published by this
/// same command. Anything else means the id belongs to another request.
async fn published_history(
    command: &InitiateGroupCheckout,
    log: &dyn EventLog,
) -> Result<Vec<GroupCheckoutEventKind>, DomainError> {
    let group_checkout_id = command.group_checkout_id;
    let stream = log.read_stream(group_checkout_id).await?;
    let same_command = stream
        .first()
        .is_some_and(|initiated| initiated.correlation_id == command.correlation_id);
    if !same_command {
        return Err(DomainError::StreamAlreadyExists(group_checkout_id));
    }
    stream
        .iter()
        .map(|event| registry().decode(&event.event_type, &event.payload))
        .collect()
}

/// Every member must be a guest stay that has been checked in at some point.
async fn ensure_members_exist(
    guest_stay_ids: &[Uuid],
    log: &dyn EventLog,
) -> Result<(), DomainError> {
    for &guest_stay_id in guest_stay_ids {
        if log.read_stream(guest_stay_id).await?.is_empty() {
            return Err(DomainError::Validation(format!(
                "guest stay {guest_stay_id} does not exist"
            )));
        }
    }
    Ok(())
}
