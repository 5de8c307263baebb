//! Administration of the background subscriptions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::get, routing::post};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use stayline_core::dead_letter::DeadLetter;
use stayline_subscriptions::SubscriptionState;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// One entry of GET /.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// The checkpoint key.
    pub subscription_id: String,
    /// `stopped`, `starting`, `subscribed` or `dropped`.
    pub state: &'static str,
}

/// One entry of GET /{id}/dead-letters.
#[derive(Debug, Serialize)]
pub struct DeadLetterResponse {
    /// Global position of the event.
    pub position: i64,
    /// The stream the event belongs to.
    pub stream_id: Uuid,
    /// The event id.
    pub event_id: Uuid,
    /// Event type name.
    pub event_type: String,
    /// Serialized payload.
    pub payload: serde_json::Value,
    /// The last handler error.
    pub error: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// When the event was given up on.
    pub failed_at: DateTime<Utc>,
}

impl From<DeadLetter> for DeadLetterResponse {
    fn from(letter: DeadLetter) -> Self {
        Self {
            position: letter.position,
            stream_id: letter.stream_id,
            event_id: letter.event_id,
            event_type: letter.event_type,
            payload: letter.payload,
            error: letter.error,
            attempts: letter.attempts,
            failed_at: letter.failed_at,
        }
    }
}

fn state_name(state: SubscriptionState) -> &'static str {
    match state {
        SubscriptionState::Stopped => "stopped",
        SubscriptionState::Starting => "starting",
        SubscriptionState::Subscribed => "subscribed",
        SubscriptionState::Dropped => "dropped",
    }
}

fn subscription_not_found(subscription_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "subscription_not_found",
            message: format!("subscription not found: {subscription_id}"),
        }),
    )
        .into_response()
}

/// GET /
async fn list_subscriptions(State(state): State<AppState>) -> Json<Vec<SubscriptionResponse>> {
    Json(
        state
            .subscriptions
            .iter()
            .map(|subscription| SubscriptionResponse {
                subscription_id: subscription.subscription_id().to_owned(),
                state: state_name(subscription.state()),
            })
            .collect(),
    )
}

/// GET /{subscription_id}/dead-letters
#[instrument(skip(state))]
async fn list_dead_letters(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<Response, ApiError> {
    if state.subscription(&subscription_id).is_none() {
        return Ok(subscription_not_found(&subscription_id));
    }
    let letters: Vec<DeadLetterResponse> = state
        .dead_letters
        .list(&subscription_id)
        .await?
        .into_iter()
        .map(DeadLetterResponse::from)
        .collect();
    Ok(Json(letters).into_response())
}

/// POST /{subscription_id}/reset
///
/// Clears the checkpoint; the running subscription resubscribes from the start.
#[instrument(skip(state))]
async fn reset_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(subscription) = state.subscription(&subscription_id) else {
        return Ok(subscription_not_found(&subscription_id));
    };
    subscription.reset().await?;
    info!("subscription reset requested");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Returns the router for subscription administration.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_subscriptions))
        .route("/{subscription_id}/dead-letters", get(list_dead_letters))
        .route("/{subscription_id}/reset", post(reset_subscription))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use stayline_core::checkpoint::CheckpointStore;
    use stayline_core::dead_letter::DeadLetterStore;
    use stayline_test_support::FixedClock;
    use tower::ServiceExt;

    use crate::state::testing::TestHarness;

    async fn send(state: &AppState, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router()
            .with_state(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_list_reports_each_subscription_state() {
        let harness = TestHarness::new();

        let (status, json) = send(&harness.state, "GET", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            serde_json::json!([{ "subscription_id": "open_guest_stays", "state": "stopped" }])
        );
    }

    #[tokio::test]
    async fn test_dead_letters_are_listed_for_known_subscription() {
        // Arrange
        let harness = TestHarness::new();
        harness
            .dead_letters
            .record(DeadLetter {
                subscription_id: "open_guest_stays".to_owned(),
                position: 12,
                stream_id: Uuid::new_v4(),
                event_id: Uuid::new_v4(),
                event_type: "guest_stay.charge_recorded".to_owned(),
                payload: serde_json::json!({ "amount": "not a number" }),
                error: "invalid type".to_owned(),
                attempts: 3,
                failed_at: FixedClock::standard().0,
            })
            .await
            .unwrap();

        // Act
        let (status, json) = send(&harness.state, "GET", "/open_guest_stays/dead-letters").await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        let letters = json.as_array().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0]["position"], 12);
        assert_eq!(letters[0]["attempts"], 3);
        assert_eq!(letters[0]["event_type"], "guest_stay.charge_recorded");
    }

    #[tokio::test]
    async fn test_reset_clears_the_checkpoint() {
        // Arrange
        let harness = TestHarness::new();
        harness
            .checkpoints
            .store("open_guest_stays", 40, None)
            .await
            .unwrap();

        // Act
        let (status, _) = send(&harness.state, "POST", "/open_guest_stays/reset").await;

        // Assert
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            harness.checkpoints.load("open_guest_stays").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_subscription_returns_404() {
        let harness = TestHarness::new();

        let (status, json) = send(&harness.state, "POST", "/nope/reset").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "subscription_not_found");

        let (status, _) = send(&harness.state, "GET", "/nope/dead-letters").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
