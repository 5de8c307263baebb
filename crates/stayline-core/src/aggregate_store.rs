//! Loads aggregates by replaying their stream and persists their uncommitted
//! events with optimistic concurrency.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::concurrency::ConcurrencyContext;
use crate::error::DomainError;
use crate::event_log::{EventLog, ExpectedVersion, StoredEvent};

/// Event-sourced repository for one aggregate type.
///
/// Optionally bound to a request-scoped [`ConcurrencyContext`]: the
/// context-driven operations ([`create`](Self::create) and
/// [`handle`](Self::handle)) read the expected version from it and write the
/// resulting version back, so callers never deal with versions directly.
pub struct AggregateStore<A> {
    log: Arc<dyn EventLog>,
    context: Option<ConcurrencyContext>,
    require_expected_version: bool,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> std::fmt::Debug for AggregateStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStore")
            .field("aggregate", &std::any::type_name::<A>())
            .field("context", &self.context)
            .field("require_expected_version", &self.require_expected_version)
            .finish_non_exhaustive()
    }
}

impl<A: AggregateRoot> AggregateStore<A> {
    /// Creates a store over `log` with no concurrency context.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            context: None,
            require_expected_version: true,
            _aggregate: PhantomData,
        }
    }

    /// Binds the store to a request-scoped concurrency context.
    #[must_use]
    pub fn with_concurrency_context(mut self, context: ConcurrencyContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Controls whether [`handle`](Self::handle) rejects a missing expected
    /// version (the default) or degrades to an unchecked append.
    #[must_use]
    pub fn require_expected_version(mut self, required: bool) -> Self {
        self.require_expected_version = required;
        self
    }

    /// Replays the stream for `id`. Returns `None` if the stream is empty.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if reading or decoding fails.
    #[instrument(skip(self), fields(aggregate = std::any::type_name::<A>()))]
    pub async fn find(&self, id: Uuid) -> Result<Option<A>, DomainError> {
        let stored_events = self.log.read_stream(id).await?;
        if stored_events.is_empty() {
            return Ok(None);
        }
        let mut aggregate = A::empty(id);
        for stored in &stored_events {
            aggregate.apply(&A::decode_event(stored)?);
        }
        Ok(Some(aggregate))
    }

    /// Appends the uncommitted events of a new aggregate to a new stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamAlreadyExists` if the id is taken.
    pub async fn add(&self, aggregate: &mut A) -> Result<i64, DomainError> {
        self.append(aggregate, ExpectedVersion::NoStream).await
    }

    /// Appends the uncommitted events of `aggregate`, asserting the stream is
    /// at `expected`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` on a version mismatch.
    pub async fn update(
        &self,
        aggregate: &mut A,
        expected: ExpectedVersion,
    ) -> Result<i64, DomainError> {
        self.append(aggregate, expected).await
    }

    /// Loads the aggregate, runs `mutate` against it and appends the result.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the stream is empty, any
    /// error raised by `mutate`, or the errors of [`update`](Self::update).
    pub async fn get_and_update<F>(
        &self,
        id: Uuid,
        expected: ExpectedVersion,
        mutate: F,
    ) -> Result<i64, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), DomainError> + Send,
    {
        let mut aggregate = self
            .find(id)
            .await?
            .ok_or(DomainError::AggregateNotFound(id))?;
        mutate(&mut aggregate)?;
        self.update(&mut aggregate, expected).await
    }

    /// Adds a new aggregate and records the resulting version in the bound
    /// context.
    ///
    /// # Errors
    ///
    /// See [`add`](Self::add).
    pub async fn create(&self, aggregate: &mut A) -> Result<i64, DomainError> {
        let next_version = self.add(aggregate).await?;
        self.record_next_version(next_version);
        Ok(next_version)
    }

    /// Runs [`get_and_update`](Self::get_and_update) with the expected version
    /// taken from the bound context, then records the resulting version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MissingExpectedVersion` if the context carries no
    /// version and one is required, otherwise the errors of
    /// [`get_and_update`](Self::get_and_update).
    pub async fn handle<F>(&self, id: Uuid, mutate: F) -> Result<i64, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), DomainError> + Send,
    {
        let expected = self.expected_from_context()?;
        let next_version = self.get_and_update(id, expected, mutate).await?;
        self.record_next_version(next_version);
        Ok(next_version)
    }

    fn expected_from_context(&self) -> Result<ExpectedVersion, DomainError> {
        match self.context.as_ref().and_then(ConcurrencyContext::expected_version) {
            Some(version) => Ok(ExpectedVersion::Exact(version)),
            None if self.require_expected_version => Err(DomainError::MissingExpectedVersion),
            None => Ok(ExpectedVersion::Any),
        }
    }

    fn record_next_version(&self, version: i64) {
        if let Some(context) = &self.context {
            context.set_next_version(version);
        }
    }

    #[instrument(
        skip(self, aggregate),
        fields(
            aggregate = std::any::type_name::<A>(),
            stream_id = %aggregate.aggregate_id(),
            %expected,
        )
    )]
    async fn append(
        &self,
        aggregate: &mut A,
        expected: ExpectedVersion,
    ) -> Result<i64, DomainError> {
        let stored_events: Vec<StoredEvent> = aggregate
            .uncommitted_events()
            .iter()
            .map(StoredEvent::from_domain_event)
            .collect();

        let next_version = self
            .log
            .append_to_stream(aggregate.aggregate_id(), expected, &stored_events)
            .await?;
        aggregate.clear_uncommitted_events();

        debug!(
            next_version,
            appended = stored_events.len(),
            "appended aggregate events"
        );
        Ok(next_version)
    }
}
