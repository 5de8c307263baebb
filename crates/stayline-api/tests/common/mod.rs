//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use stayline_core::checkpoint::CheckpointStore;
use stayline_core::clock::Clock;
use stayline_core::dead_letter::DeadLetterStore;
use stayline_core::document::DocumentStore;
use stayline_core::event_log::{EventFilter, EventLog};
use stayline_event_store::{PgCheckpointStore, PgDeadLetterStore, PgDocumentStore, PgEventLog};
use stayline_group_checkout::application::event_handler::{
    GROUP_CHECKOUT_HANDLER_NAME, GroupCheckoutHandler, subscription_filter,
};
use stayline_group_checkout::domain::process_manager::{GROUP_CHECKOUTS_KIND, GroupCheckout};
use stayline_guest_stay::projection::{
    OPEN_GUEST_STAYS_KIND, OpenGuestStay, open_guest_stays_projection,
};
use stayline_subscriptions::{AllStreamSubscription, RetryPolicy, SubscriptionOptions};
use stayline_test_support::FixedClock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use stayline_api::bus::InProcessCheckoutBus;
use stayline_api::routes;
use stayline_api::state::AppState;

/// A running application: the router plus its background subscriptions.
pub struct TestApp {
    pub router: Router,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestApp {
    /// Stops the background subscriptions and waits for them.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("subscription did not stop")
                .unwrap();
        }
    }
}

fn options(subscription_id: &str, filter: EventFilter) -> SubscriptionOptions {
    SubscriptionOptions::new(subscription_id)
        .with_filter(filter)
        .with_resubscribe_delay(Duration::from_millis(20))
        .with_handler_retry(RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(5),
        })
}

/// Build the full app against PostgreSQL with a fixed clock, the same way
/// `main.rs` wires it, and start both subscriptions.
pub fn spawn_test_app(pool: PgPool) -> TestApp {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::standard());
    let event_log: Arc<dyn EventLog> = Arc::new(PgEventLog::new(pool.clone()));
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(PgCheckpointStore::new(pool.clone()));
    let dead_letters: Arc<dyn DeadLetterStore> = Arc::new(PgDeadLetterStore::new(pool.clone()));
    let open_guest_stays: Arc<dyn DocumentStore<OpenGuestStay>> = Arc::new(
        PgDocumentStore::<OpenGuestStay>::new(pool.clone(), OPEN_GUEST_STAYS_KIND),
    );
    let group_checkouts: Arc<dyn DocumentStore<GroupCheckout>> =
        Arc::new(PgDocumentStore::<GroupCheckout>::new(pool, GROUP_CHECKOUTS_KIND));

    let projection = open_guest_stays_projection(Arc::clone(&open_guest_stays));
    let projection_filter = EventFilter::default().with_event_types(projection.event_types());
    let subscriptions = vec![
        Arc::new(AllStreamSubscription::new(
            options(OPEN_GUEST_STAYS_KIND, projection_filter),
            Arc::clone(&event_log),
            Arc::clone(&checkpoints),
            Arc::clone(&dead_letters),
            Arc::new(projection),
            Arc::clone(&clock),
        )),
        Arc::new(AllStreamSubscription::new(
            options(GROUP_CHECKOUT_HANDLER_NAME, subscription_filter()),
            Arc::clone(&event_log),
            Arc::clone(&checkpoints),
            Arc::clone(&dead_letters),
            Arc::new(GroupCheckoutHandler::new(
                Arc::clone(&group_checkouts),
                Arc::clone(&event_log),
                Arc::clone(&clock),
            )),
            Arc::clone(&clock),
        )),
    ];

    let (shutdown, shutdown_rx) = watch::channel(false);
    let tasks = subscriptions
        .iter()
        .map(|subscription| {
            let subscription = Arc::clone(subscription);
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                subscription.run(shutdown_rx).await.unwrap();
            })
        })
        .collect();

    let app_state = AppState {
        checkout_bus: Arc::new(InProcessCheckoutBus::new(
            Arc::clone(&event_log),
            Arc::clone(&clock),
        )),
        clock,
        event_log,
        open_guest_stays,
        group_checkouts,
        dead_letters,
        subscriptions: Arc::new(subscriptions),
    };

    TestApp {
        router: routes::build_router(app_state),
        shutdown,
        tasks,
    }
}

/// Send a request with an optional `If-Match` header and JSON body and
/// return the status, headers and JSON body (`Null` when empty).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    if_match: Option<&str>,
    body: Option<&serde_json::Value>,
) -> (StatusCode, HeaderMap, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = if_match {
        builder = builder.header("if-match", token);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, headers, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: &Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let (status, _, json) = send(app, "POST", uri, None, Some(body)).await;
    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, json) = send(app, "GET", uri, None, None).await;
    (status, json)
}

/// The `ETag` header of a response.
pub fn etag(headers: &HeaderMap) -> String {
    headers["etag"].to_str().unwrap().to_owned()
}

/// Polls `check` every 20 ms until it returns `true` or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
