//! Read model of guest stays that have not checked out yet.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use tracing::instrument;

use stayline_guest_stay::projection::OpenGuestStay;

use crate::error::ApiError;
use crate::state::AppState;

/// One entry of GET /.
#[derive(Debug, Serialize)]
pub struct OpenGuestStayResponse {
    /// The projected document.
    #[serde(flatten)]
    pub stay: OpenGuestStay,
    /// Global position of the last event folded into it.
    pub last_position: i64,
}

/// GET /
#[instrument(skip(state))]
async fn list_open_guest_stays(
    State(state): State<AppState>,
) -> Result<Json<Vec<OpenGuestStayResponse>>, ApiError> {
    let mut stays: Vec<OpenGuestStayResponse> = state
        .open_guest_stays
        .list()
        .await?
        .into_iter()
        .map(|versioned| OpenGuestStayResponse {
            stay: versioned.document,
            last_position: versioned.last_position,
        })
        .collect();
    stays.sort_by_key(|entry| (entry.stay.opened_at, entry.stay.guest_stay_id));
    Ok(Json(stays))
}

/// Returns the router for the open guest stays read model.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_open_guest_stays))
}
