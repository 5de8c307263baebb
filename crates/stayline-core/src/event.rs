//! Domain event abstractions.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Monotonically increasing version within the aggregate stream.
    pub sequence_number: i64,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + fmt::Debug {
    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;
}

/// Decoder from a JSON payload into one member of an event family.
pub type EventDecoder<K> = fn(serde_json::Value) -> Result<K, serde_json::Error>;

/// Explicit table from event type name to payload decoder.
///
/// Each event family builds one registry at startup and looks decoders up by
/// the stored `event_type` string. Nothing is discovered at runtime: a type
/// that was never registered is simply unknown.
pub struct EventTypeRegistry<K> {
    decoders: HashMap<&'static str, EventDecoder<K>>,
}

impl<K> EventTypeRegistry<K> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers the decoder for `event_type`, replacing any earlier entry.
    #[must_use]
    pub fn register(mut self, event_type: &'static str, decoder: EventDecoder<K>) -> Self {
        self.decoders.insert(event_type, decoder);
        self
    }

    /// Returns `true` if `event_type` has a decoder.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Iterates over the registered event type names.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Decodes `payload` as `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the type is unknown or the
    /// payload does not match its shape.
    pub fn decode(&self, event_type: &str, payload: &serde_json::Value) -> Result<K, DomainError> {
        self.try_decode(event_type, payload)?.ok_or_else(|| {
            DomainError::Infrastructure(format!("unknown event type: {event_type}"))
        })
    }

    /// Decodes `payload` as `event_type`, returning `None` for unknown types.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the type is known but the
    /// payload does not match its shape.
    pub fn try_decode(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<K>, DomainError> {
        let Some(decoder) = self.decoders.get(event_type) else {
            return Ok(None);
        };
        decoder(payload.clone()).map(Some).map_err(|e| {
            DomainError::Infrastructure(format!(
                "event deserialization failed for {event_type}: {e}"
            ))
        })
    }
}

impl<K> Default for EventTypeRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for EventTypeRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("EventTypeRegistry")
            .field("event_types", &names)
            .finish()
    }
}
