//! Shared application state.

use std::sync::Arc;

use stayline_core::aggregate_store::AggregateStore;
use stayline_core::clock::Clock;
use stayline_core::command::CommandBus;
use stayline_core::concurrency::ConcurrencyContext;
use stayline_core::dead_letter::DeadLetterStore;
use stayline_core::document::DocumentStore;
use stayline_core::event_log::EventLog;
use stayline_group_checkout::domain::process_manager::GroupCheckout;
use stayline_guest_stay::domain::aggregates::GuestStayAccount;
use stayline_guest_stay::domain::commands::CheckOutGuest;
use stayline_guest_stay::projection::OpenGuestStay;
use stayline_subscriptions::AllStreamSubscription;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clock for timestamps.
    pub clock: Arc<dyn Clock>,
    /// The event log every stream is written to.
    pub event_log: Arc<dyn EventLog>,
    /// Read model of guest stays that are still open.
    pub open_guest_stays: Arc<dyn DocumentStore<OpenGuestStay>>,
    /// Group checkout process manager state.
    pub group_checkouts: Arc<dyn DocumentStore<GroupCheckout>>,
    /// Events the background subscriptions gave up on.
    pub dead_letters: Arc<dyn DeadLetterStore>,
    /// Delivers the checkouts a group checkout schedules.
    pub checkout_bus: Arc<dyn CommandBus<CheckOutGuest>>,
    /// Background subscriptions, for inspection and reset.
    pub subscriptions: Arc<Vec<Arc<AllStreamSubscription>>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// A guest stay store bound to the request's concurrency context. Writes
    /// other than check-in require an expected version.
    #[must_use]
    pub fn guest_stays(&self, context: ConcurrencyContext) -> AggregateStore<GuestStayAccount> {
        AggregateStore::new(Arc::clone(&self.event_log)).with_concurrency_context(context)
    }

    /// Looks up a background subscription by id.
    #[must_use]
    pub fn subscription(&self, subscription_id: &str) -> Option<&Arc<AllStreamSubscription>> {
        self.subscriptions
            .iter()
            .find(|subscription| subscription.subscription_id() == subscription_id)
    }
}
