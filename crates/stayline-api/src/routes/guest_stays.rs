//! Routes for the Guest Stay bounded context.
//!
//! Version tokens travel as weak `ETag`s. Every write except check-in must
//! carry the last seen `ETag` in `If-Match`; the response carries the new one.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get, routing::post};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use stayline_core::concurrency::{ConcurrencyContext, etag};
use stayline_guest_stay::application::{command_handlers, query_handlers};
use stayline_guest_stay::domain::aggregates::CheckoutOutcome;
use stayline_guest_stay::domain::commands;
use stayline_guest_stay::domain::events::CheckoutFailureReason;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Default, Deserialize)]
pub struct CheckInRequest {
    /// Client-chosen id. A new one is generated when absent.
    #[serde(default)]
    pub guest_stay_id: Option<Uuid>,
}

/// Request body for POST /{id}/charges and /{id}/payments.
#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    /// Amount in cents. Must be positive.
    pub amount: i64,
}

/// Request body for POST /{id}/check-out.
#[derive(Debug, Default, Deserialize)]
pub struct CheckOutRequest {
    /// Group checkout the request belongs to, if any.
    #[serde(default)]
    pub group_checkout_id: Option<Uuid>,
}

/// Response body returned after a command is successfully handled.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// The guest stay affected by the command.
    pub guest_stay_id: Uuid,
    /// The stream version after the command.
    pub version: i64,
}

/// Response body of POST /{id}/check-out.
#[derive(Debug, Serialize)]
pub struct CheckOutResponse {
    /// The guest stay affected by the command.
    pub guest_stay_id: Uuid,
    /// The stream version after the command.
    pub version: i64,
    /// `checked_out` or `failed`.
    pub outcome: &'static str,
    /// Why the checkout was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CheckoutFailureReason>,
}

fn concurrency_context(headers: &HeaderMap) -> ConcurrencyContext {
    ConcurrencyContext::from_if_match(
        headers
            .get(header::IF_MATCH)
            .and_then(|value| value.to_str().ok()),
    )
}

fn next_etag(context: &ConcurrencyContext, version: i64) -> String {
    context.next_etag().unwrap_or_else(|| etag(version))
}

/// POST /
#[instrument(skip_all)]
async fn check_in(
    State(state): State<AppState>,
    request: Option<Json<CheckInRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let command = commands::CheckInGuest {
        correlation_id: Uuid::new_v4(),
        guest_stay_id: request.guest_stay_id.unwrap_or_else(Uuid::new_v4),
    };

    info!(
        correlation_id = %command.correlation_id,
        guest_stay_id = %command.guest_stay_id,
        "handling check_in_guest command"
    );

    let context = ConcurrencyContext::new();
    let result = command_handlers::handle_check_in_guest(
        &command,
        state.clock.as_ref(),
        &state.guest_stays(context.clone()),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        [
            (header::ETAG, next_etag(&context, result.next_version)),
            (
                header::LOCATION,
                format!("/api/v1/guest-stays/{}", result.guest_stay_id),
            ),
        ],
        Json(CommandResponse {
            guest_stay_id: result.guest_stay_id,
            version: result.next_version,
        }),
    ))
}

/// GET /{guest_stay_id}
#[instrument(skip(state))]
async fn get_guest_stay(
    State(state): State<AppState>,
    Path(guest_stay_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = query_handlers::get_guest_stay_by_id(
        guest_stay_id,
        &state.guest_stays(ConcurrencyContext::new()),
    )
    .await?;
    Ok(([(header::ETAG, etag(view.version))], Json(view)))
}

/// POST /{guest_stay_id}/charges
#[instrument(skip(state, headers, request))]
async fn record_charge(
    State(state): State<AppState>,
    Path(guest_stay_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::RecordCharge {
        correlation_id: Uuid::new_v4(),
        guest_stay_id,
        amount: request.amount,
    };
    let context = concurrency_context(&headers);

    info!(correlation_id = %command.correlation_id, amount = command.amount, "handling record_charge command");

    let result = command_handlers::handle_record_charge(
        &command,
        state.clock.as_ref(),
        &state.guest_stays(context.clone()),
    )
    .await?;

    Ok((
        [(header::ETAG, next_etag(&context, result.next_version))],
        Json(CommandResponse {
            guest_stay_id,
            version: result.next_version,
        }),
    ))
}

/// POST /{guest_stay_id}/payments
#[instrument(skip(state, headers, request))]
async fn record_payment(
    State(state): State<AppState>,
    Path(guest_stay_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::RecordPayment {
        correlation_id: Uuid::new_v4(),
        guest_stay_id,
        amount: request.amount,
    };
    let context = concurrency_context(&headers);

    info!(correlation_id = %command.correlation_id, amount = command.amount, "handling record_payment command");

    let result = command_handlers::handle_record_payment(
        &command,
        state.clock.as_ref(),
        &state.guest_stays(context.clone()),
    )
    .await?;

    Ok((
        [(header::ETAG, next_etag(&context, result.next_version))],
        Json(CommandResponse {
            guest_stay_id,
            version: result.next_version,
        }),
    ))
}

/// POST /{guest_stay_id}/check-out
#[instrument(skip(state, headers, request))]
async fn check_out(
    State(state): State<AppState>,
    Path(guest_stay_id): Path<Uuid>,
    headers: HeaderMap,
    request: Option<Json<CheckOutRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let command = commands::CheckOutGuest {
        correlation_id: Uuid::new_v4(),
        guest_stay_id,
        group_checkout_id: request.group_checkout_id,
    };
    let context = concurrency_context(&headers);

    info!(correlation_id = %command.correlation_id, "handling check_out_guest command");

    let result = command_handlers::handle_check_out_guest(
        &command,
        state.clock.as_ref(),
        &state.guest_stays(context.clone()),
    )
    .await?;

    let (outcome, reason) = match result.outcome {
        CheckoutOutcome::CheckedOut => ("checked_out", None),
        CheckoutOutcome::Failed(reason) => ("failed", Some(reason)),
    };

    Ok((
        [(header::ETAG, next_etag(&context, result.next_version))],
        Json(CheckOutResponse {
            guest_stay_id,
            version: result.next_version,
            outcome,
            reason,
        }),
    ))
}

/// Returns the router for the guest stay context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(check_in))
        .route("/{guest_stay_id}", get(get_guest_stay))
        .route("/{guest_stay_id}/charges", post(record_charge))
        .route("/{guest_stay_id}/payments", post(record_payment))
        .route("/{guest_stay_id}/check-out", post(check_out))
}
