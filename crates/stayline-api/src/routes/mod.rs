//! Route modules organized by bounded context.

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod group_checkouts;
pub mod guest_stays;
pub mod health;
pub mod open_guest_stays;
pub mod subscriptions;

/// Builds the full application router.
pub fn build_router(state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    Router::new()
        .merge(health::router())
        .nest("/api/v1/guest-stays", guest_stays::router())
        .nest("/api/v1/open-guest-stays", open_guest_stays::router())
        .nest("/api/v1/group-checkouts", group_checkouts::router())
        .nest("/api/v1/subscriptions", subscriptions::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
