//! In-memory `EventLog` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use stayline_core::error::DomainError;
use stayline_core::event_log::{
    EventFilter, EventLog, EventStream, ExpectedVersion, RecordedEvent, StoredEvent,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

const LIVE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum LiveMessage {
    Event(RecordedEvent),
    Disconnect,
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<RecordedEvent>,
    versions: HashMap<Uuid, i64>,
}

/// A complete in-memory event log: per-stream optimistic concurrency, a
/// global position sequence starting at 1, and live subscriptions fed from a
/// broadcast channel.
///
/// [`disconnect_subscribers`](Self::disconnect_subscribers) drops every open
/// subscription, and [`fail_next_subscriptions`](Self::fail_next_subscriptions)
/// makes new subscriptions fail immediately, to exercise reconnect logic.
#[derive(Debug)]
pub struct InMemoryEventLog {
    state: Mutex<LogState>,
    live: broadcast::Sender<LiveMessage>,
    failing_subscriptions: AtomicUsize,
    subscriptions_opened: AtomicUsize,
}

impl InMemoryEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            state: Mutex::new(LogState::default()),
            live,
            failing_subscriptions: AtomicUsize::new(0),
            subscriptions_opened: AtomicUsize::new(0),
        }
    }

    /// Returns every recorded event in global order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn all_events(&self) -> Vec<RecordedEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Drops every open subscription with a transient error.
    pub fn disconnect_subscribers(&self) {
        let _ = self.live.send(LiveMessage::Disconnect);
    }

    /// Makes the next `count` calls to `subscribe_to_all` fail immediately.
    pub fn fail_next_subscriptions(&self, count: usize) {
        self.failing_subscriptions.store(count, Ordering::SeqCst);
    }

    /// How many subscriptions have been requested so far.
    pub fn subscriptions_opened(&self) -> usize {
        self.subscriptions_opened.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn read_stream(&self, stream_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|recorded| recorded.event.aggregate_id == stream_id)
            .map(|recorded| recorded.event.clone())
            .collect())
    }

    async fn append_to_stream(
        &self,
        stream_id: Uuid,
        expected: ExpectedVersion,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        let mut state = self.state.lock().unwrap();
        let actual = state.versions.get(&stream_id).copied().unwrap_or(0);
        expected.check(stream_id, actual)?;

        let mut version = actual;
        for event in events {
            version += 1;
            let position = i64::try_from(state.events.len()).unwrap() + 1;
            let mut stamped = event.clone();
            stamped.aggregate_id = stream_id;
            stamped.sequence_number = version;
            let recorded = RecordedEvent {
                position,
                event: stamped,
            };
            state.events.push(recorded.clone());
            let _ = self.live.send(LiveMessage::Event(recorded));
        }
        state.versions.insert(stream_id, version);
        Ok(version)
    }

    async fn read_all(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|recorded| after.is_none_or(|after| recorded.position > after))
            .take(limit)
            .cloned()
            .collect())
    }

    fn subscribe_to_all(&self, after: Option<i64>, filter: EventFilter) -> EventStream<'_> {
        self.subscriptions_opened.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failing_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Box::pin(futures::stream::once(async {
                Err(DomainError::Infrastructure("connection refused".into()))
            }));
        }

        // Subscribe before taking the snapshot so nothing committed in between
        // is missed; duplicates are skipped by position below.
        let (mut live, history) = {
            let state = self.state.lock().unwrap();
            let live = self.live.subscribe();
            let history: Vec<RecordedEvent> = state
                .events
                .iter()
                .filter(|recorded| after.is_none_or(|after| recorded.position > after))
                .cloned()
                .collect();
            (live, history)
        };

        Box::pin(async_stream::stream! {
            let mut last_position = after;
            for recorded in history {
                last_position = Some(recorded.position);
                if filter.matches(recorded.event_type()) {
                    yield Ok(recorded);
                }
            }

            loop {
                match live.recv().await {
                    Ok(LiveMessage::Event(recorded)) => {
                        if last_position.is_some_and(|last| recorded.position <= last) {
                            continue;
                        }
                        last_position = Some(recorded.position);
                        if filter.matches(recorded.event_type()) {
                            yield Ok(recorded);
                        }
                    }
                    Ok(LiveMessage::Disconnect) => {
                        yield Err(DomainError::Infrastructure(
                            "subscription dropped by server".into(),
                        ));
                        return;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        yield Err(DomainError::Infrastructure(format!(
                            "subscriber lagged behind by {missed} events"
                        )));
                        return;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}

/// An event log that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventLog;

#[async_trait]
impl EventLog for FailingEventLog {
    async fn read_stream(&self, _stream_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn append_to_stream(
        &self,
        _stream_id: Uuid,
        _expected: ExpectedVersion,
        _events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn read_all(
        &self,
        _after: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    fn subscribe_to_all(&self, _after: Option<i64>, _filter: EventFilter) -> EventStream<'_> {
        Box::pin(futures::stream::once(async {
            Err(DomainError::Infrastructure("connection refused".into()))
        }))
    }
}

/// Builds a `StoredEvent` with sensible defaults.
#[must_use]
pub fn stored_event(
    stream_id: Uuid,
    event_type: &str,
    payload: serde_json::Value,
) -> StoredEvent {
    let correlation_id = Uuid::new_v4();
    StoredEvent {
        event_id: Uuid::new_v4(),
        aggregate_id: stream_id,
        event_type: event_type.to_owned(),
        payload,
        sequence_number: 0,
        correlation_id,
        causation_id: correlation_id,
        occurred_at: Utc::now(),
    }
}
