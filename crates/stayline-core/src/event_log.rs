//! Event log abstraction: per-stream append with expected version, plus a
//! globally ordered read and live subscription over every stream.

use std::collections::HashSet;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{DomainEvent, EventMetadata};

/// Prefix reserved for system and bookkeeping event types.
pub const SYSTEM_EVENT_PREFIX: &str = "$";

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Sequence number within the aggregate stream.
    pub sequence_number: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds the stored form of a domain event.
    pub fn from_domain_event<E: DomainEvent>(event: &E) -> Self {
        let meta = event.metadata();
        Self {
            event_id: meta.event_id,
            aggregate_id: meta.aggregate_id,
            event_type: event.event_type().to_owned(),
            payload: event.to_payload(),
            sequence_number: meta.sequence_number,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
        }
    }

    /// Rebuilds the metadata envelope of this event.
    #[must_use]
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            aggregate_id: self.aggregate_id,
            sequence_number: self.sequence_number,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            occurred_at: self.occurred_at,
        }
    }
}

/// An event as read back from the global log.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Position in the global log. Strictly increasing across all streams.
    pub position: i64,
    /// The stored event.
    pub event: StoredEvent,
}

impl RecordedEvent {
    /// The event type name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }

    /// The stream the event was appended to.
    #[must_use]
    pub fn stream_id(&self) -> Uuid {
        self.event.aggregate_id
    }

    /// Returns `true` when the event carries no data worth projecting.
    #[must_use]
    pub fn has_empty_payload(&self) -> bool {
        match &self.event.payload {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

/// The version a writer believes a stream to be at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Do not check the stream version.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must be at exactly this version.
    Exact(i64),
}

impl ExpectedVersion {
    /// Verifies `actual` against this expectation.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamAlreadyExists` when `NoStream` was expected
    /// and the stream has events, or `DomainError::ConcurrencyConflict` when
    /// an exact version does not match.
    pub fn check(self, stream_id: Uuid, actual: i64) -> Result<(), DomainError> {
        match self {
            Self::Any => Ok(()),
            Self::NoStream if actual == 0 => Ok(()),
            Self::NoStream => Err(DomainError::StreamAlreadyExists(stream_id)),
            Self::Exact(expected) if expected == actual => Ok(()),
            Self::Exact(_) => Err(DomainError::ConcurrencyConflict {
                stream_id,
                expected: self,
                actual,
            }),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

/// Selects which event types a global subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    excluded_prefixes: Vec<String>,
    event_types: Option<HashSet<String>>,
}

impl EventFilter {
    /// A filter that lets every event through.
    #[must_use]
    pub fn all() -> Self {
        Self {
            excluded_prefixes: Vec::new(),
            event_types: None,
        }
    }

    /// Excludes event types starting with `prefix`.
    #[must_use]
    pub fn excluding_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.excluded_prefixes.push(prefix.into());
        self
    }

    /// Restricts delivery to the given event types.
    #[must_use]
    pub fn with_event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(event_types.into_iter().map(Into::into).collect());
        self
    }

    /// Returns `true` if an event of `event_type` passes the filter.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| event_type.starts_with(prefix.as_str()))
        {
            return false;
        }
        self.event_types
            .as_ref()
            .is_none_or(|types| types.contains(event_type))
    }
}

impl Default for EventFilter {
    /// Excludes system events.
    fn default() -> Self {
        Self::all().excluding_prefix(SYSTEM_EVENT_PREFIX)
    }
}

/// A live feed of recorded events. An `Err` item or the end of the stream
/// means the subscription was dropped.
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<RecordedEvent, DomainError>> + Send + 'a>>;

/// Append-only event log keyed by stream id.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Load all events for a given stream, ordered by sequence number.
    async fn read_stream(&self, stream_id: Uuid) -> Result<Vec<StoredEvent>, DomainError>;

    /// Append events to a stream atomically, checking `expected` first.
    ///
    /// The log stamps each event's `sequence_number` with its position in the
    /// stream. Returns the stream version after the append; an empty append
    /// returns the current version.
    async fn append_to_stream(
        &self,
        stream_id: Uuid,
        expected: ExpectedVersion,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError>;

    /// Read up to `limit` events from the global log strictly after `after`
    /// (`None` reads from the beginning).
    async fn read_all(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>, DomainError>;

    /// Subscribe to every stream strictly after `after`: historical events
    /// first, then live ones as they are committed.
    fn subscribe_to_all(&self, after: Option<i64>, filter: EventFilter) -> EventStream<'_>;
}
