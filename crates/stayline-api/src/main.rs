//! Stayline API server entry point.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use stayline_core::checkpoint::CheckpointStore;
use stayline_core::clock::{Clock, SystemClock};
use stayline_core::dead_letter::DeadLetterStore;
use stayline_core::document::DocumentStore;
use stayline_core::event_log::{EventFilter, EventLog};
use stayline_event_store::{
    PgCheckpointStore, PgDeadLetterStore, PgDocumentStore, PgEventLog, schema,
};
use stayline_group_checkout::application::event_handler::{
    GROUP_CHECKOUT_HANDLER_NAME, GroupCheckoutHandler, subscription_filter,
};
use stayline_group_checkout::domain::process_manager::{GROUP_CHECKOUTS_KIND, GroupCheckout};
use stayline_guest_stay::projection::{
    OPEN_GUEST_STAYS_KIND, OpenGuestStay, open_guest_stays_projection,
};
use stayline_subscriptions::AllStreamSubscription;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use stayline_api::bus::InProcessCheckoutBus;
use stayline_api::config::AppConfig;
use stayline_api::error::AppError;
use stayline_api::routes;
use stayline_api::state::AppState;
use stayline_api::telemetry;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let telemetry = telemetry::init(config.otlp_endpoint.as_deref())?;

    info!("Starting Stayline API server");

    let result = run(config).await;
    if let Err(e) = &result {
        error!(error = %e, "server stopped with an error");
    }
    telemetry.shutdown();
    result
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    let addr = config.listen_addr()?;

    // Create database connection pool and bring the schema up to date.
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    schema::run_migrations(&pool).await?;
    info!("database migrations applied");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let event_log: Arc<dyn EventLog> = Arc::new(PgEventLog::new(pool.clone()));
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(PgCheckpointStore::new(pool.clone()));
    let dead_letters: Arc<dyn DeadLetterStore> = Arc::new(PgDeadLetterStore::new(pool.clone()));
    let open_guest_stays: Arc<dyn DocumentStore<OpenGuestStay>> = Arc::new(
        PgDocumentStore::<OpenGuestStay>::new(pool.clone(), OPEN_GUEST_STAYS_KIND),
    );
    let group_checkouts: Arc<dyn DocumentStore<GroupCheckout>> = Arc::new(
        PgDocumentStore::<GroupCheckout>::new(pool.clone(), GROUP_CHECKOUTS_KIND),
    );

    // Background subscriptions.
    let projection = open_guest_stays_projection(Arc::clone(&open_guest_stays));
    let projection_filter = EventFilter::default().with_event_types(projection.event_types());
    let subscriptions = vec![
        Arc::new(AllStreamSubscription::new(
            config
                .subscription_options(OPEN_GUEST_STAYS_KIND)
                .with_filter(projection_filter),
            Arc::clone(&event_log),
            Arc::clone(&checkpoints),
            Arc::clone(&dead_letters),
            Arc::new(projection),
            Arc::clone(&clock),
        )),
        Arc::new(AllStreamSubscription::new(
            config
                .subscription_options(GROUP_CHECKOUT_HANDLER_NAME)
                .with_filter(subscription_filter()),
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

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks: Vec<JoinHandle<()>> = subscriptions
        .iter()
        .map(|subscription| {
            let subscription = Arc::clone(subscription);
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = subscription.run(shutdown).await {
                    error!(
                        subscription_id = subscription.subscription_id(),
                        error = %e,
                        "subscription exited"
                    );
                }
            })
        })
        .collect();

    // Build application state.
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

    let app = routes::build_router(app_state);

    // Start server.
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::spawn(shutdown_on_ctrl_c(shutdown_tx));
    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // An error means the sender is gone, which also means stop.
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("HTTP server stopped, waiting for subscriptions");
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "subscription task panicked");
        }
    }
    info!("Stayline API server stopped");
    Ok(())
}

async fn shutdown_on_ctrl_c(shutdown: watch::Sender<bool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
    }
    shutdown.send_replace(true);
}
