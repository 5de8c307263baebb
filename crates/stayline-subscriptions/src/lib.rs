//! Stayline: subscriptions and projections.
//!
//! [`AllStreamSubscription`] tails the global event log from a stored
//! checkpoint and feeds batches to an [`EventHandler`].
//! [`ProjectionApplier`] is the handler that folds those batches into
//! documents, writing one net operation per document.

pub mod handler;
pub mod projection;
pub mod subscription;

pub use handler::EventHandler;
pub use projection::ProjectionApplier;
pub use subscription::{
    AllStreamSubscription, RetryPolicy, SubscriptionOptions, SubscriptionState,
};
