//! Parking place for events a subscription gave up on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;

/// An event that failed processing after exhausting its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// The subscription that failed to process the event.
    pub subscription_id: String,
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
    /// The last error message.
    pub error: String,
    /// How many attempts were made.
    pub attempts: u32,
    /// When the event was given up on.
    pub failed_at: DateTime<Utc>,
}

/// Durable store of dead letters.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Records a dead letter.
    async fn record(&self, dead_letter: DeadLetter) -> Result<(), DomainError>;

    /// Lists dead letters of a subscription in position order.
    async fn list(&self, subscription_id: &str) -> Result<Vec<DeadLetter>, DomainError>;
}
