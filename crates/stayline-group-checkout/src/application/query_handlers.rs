//! Query handlers for the Group Checkout context.

use stayline_core::document::DocumentStore;
use stayline_core::error::DomainError;
use uuid::Uuid;

use crate::domain::process_manager::GroupCheckout;

/// Retrieves the current state of a group checkout.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no such group checkout exists.
pub async fn get_group_checkout_by_id(
    group_checkout_id: Uuid,
    checkouts: &dyn DocumentStore<GroupCheckout>,
) -> Result<GroupCheckout, DomainError> {
    checkouts
        .get(group_checkout_id)
        .await?
        .map(|versioned| versioned.document)
        .ok_or(DomainError::AggregateNotFound(group_checkout_id))
}
