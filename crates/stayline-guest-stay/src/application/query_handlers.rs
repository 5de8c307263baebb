//! Query handlers for the Guest Stay context.
//!
//! Queries replay the account's stream and return read-only view DTOs. The
//! view carries the stream version so callers can send it back as `If-Match`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use stayline_core::aggregate::AggregateRoot;
use stayline_core::aggregate_store::AggregateStore;
use stayline_core::error::DomainError;
use uuid::Uuid;

use crate::domain::aggregates::{GuestStayAccount, GuestStayStatus};

/// Read-only view of a guest stay account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestStayView {
    /// The guest stay identifier.
    pub guest_stay_id: Uuid,
    /// Open or checked out.
    pub status: GuestStayStatus,
    /// Charges minus payments, in cents.
    pub balance: i64,
    /// When the guest checked in.
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Current version (event count).
    pub version: i64,
}

/// Retrieves a guest stay by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no events exist for the ID.
/// Returns `DomainError::Infrastructure` if event deserialization fails.
pub async fn get_guest_stay_by_id(
    guest_stay_id: Uuid,
    store: &AggregateStore<GuestStayAccount>,
) -> Result<GuestStayView, DomainError> {
    let account = store
        .find(guest_stay_id)
        .await?
        .ok_or(DomainError::AggregateNotFound(guest_stay_id))?;
    // A stream always starts with the check-in event.
    let status = account
        .status()
        .ok_or(DomainError::AggregateNotFound(guest_stay_id))?;
    Ok(GuestStayView {
        guest_stay_id,
        status,
        balance: account.balance(),
        checked_in_at: account.checked_in_at(),
        version: account.version(),
    })
}
