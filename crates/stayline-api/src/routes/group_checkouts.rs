//! Routes for the Group Checkout process manager.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get, routing::post};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use stayline_group_checkout::application::{command_handlers, query_handlers};
use stayline_group_checkout::domain::commands::InitiateGroupCheckout;
use stayline_group_checkout::domain::process_manager::GroupCheckout;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct InitiateGroupCheckoutRequest {
    /// Client-chosen id. A new one is generated when absent.
    #[serde(default)]
    pub group_checkout_id: Option<Uuid>,
    /// The clerk requesting the checkout.
    pub clerk_id: Uuid,
    /// The guest stays to check out together.
    pub guest_stay_ids: Vec<Uuid>,
}

/// POST /
///
/// Accepted rather than completed: member checkouts run in the background
/// and the outcome is read back through GET /{id}.
#[instrument(skip_all, fields(clerk_id = %request.clerk_id, members = request.guest_stay_ids.len()))]
async fn initiate_group_checkout(
    State(state): State<AppState>,
    Json(request): Json<InitiateGroupCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = InitiateGroupCheckout {
        correlation_id: Uuid::new_v4(),
        group_checkout_id: request.group_checkout_id.unwrap_or_else(Uuid::new_v4),
        clerk_id: request.clerk_id,
        guest_stay_ids: request.guest_stay_ids,
    };

    info!(
        correlation_id = %command.correlation_id,
        group_checkout_id = %command.group_checkout_id,
        "handling initiate_group_checkout command"
    );

    let checkout = command_handlers::handle_initiate_group_checkout(
        &command,
        state.clock.as_ref(),
        state.group_checkouts.as_ref(),
        state.event_log.as_ref(),
        state.checkout_bus.as_ref(),
    )
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        [(
            header::LOCATION,
            format!("/api/v1/group-checkouts/{}", checkout.id),
        )],
        Json(checkout),
    ))
}

/// GET /{group_checkout_id}
#[instrument(skip(state))]
async fn get_group_checkout(
    State(state): State<AppState>,
    Path(group_checkout_id): Path<Uuid>,
) -> Result<Json<GroupCheckout>, ApiError> {
    let checkout =
        query_handlers::get_group_checkout_by_id(group_checkout_id, state.group_checkouts.as_ref())
            .await?;
    Ok(Json(checkout))
}

/// Returns the router for the group checkout context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(initiate_group_checkout))
        .route("/{group_checkout_id}", get(get_group_checkout))
}
