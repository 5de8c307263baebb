//! Checkpointed catch-up/live subscription over the whole event log.
//!
//! The loop loads the checkpoint, subscribes strictly after it, hands each
//! batch of ready events to the handler and then moves the checkpoint to the
//! batch's last position. Any drop (stream error, stream end, checkpoint
//! mismatch, storage failure) ends the current attempt; the loop waits
//! `resubscribe_delay` and starts again from the stored checkpoint until
//! shutdown is signalled. Resetting the checkpoint ends the current attempt
//! too, so the replay starts even when no new events arrive.

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use stayline_core::checkpoint::{CheckpointStore, StoreCheckpointResult};
use stayline_core::clock::Clock;
use stayline_core::dead_letter::{DeadLetter, DeadLetterStore};
use stayline_core::error::DomainError;
use stayline_core::event_log::{
    EventFilter, EventLog, EventStream, RecordedEvent, SYSTEM_EVENT_PREFIX,
};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::handler::EventHandler;

/// Fixed-delay retry policy for handler failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per batch (and per event once a batch is split). At least 1.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(200),
        }
    }
}

/// Configuration of one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Checkpoint key. One running subscription per id.
    pub subscription_id: String,
    /// Which event types are delivered.
    pub filter: EventFilter,
    /// Pause before resubscribing after a drop.
    pub resubscribe_delay: Duration,
    /// Upper bound on events handed to the handler at once.
    pub max_batch_size: usize,
    /// Handler retry policy.
    pub handler_retry: RetryPolicy,
}

impl SubscriptionOptions {
    /// Options with the default filter (no system events), a one second
    /// resubscribe delay, batches of up to 100 events and the default retry
    /// policy.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            filter: EventFilter::default(),
            resubscribe_delay: Duration::from_secs(1),
            max_batch_size: 100,
            handler_retry: RetryPolicy::default(),
        }
    }

    /// Replaces the event filter.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the pause before resubscribing.
    #[must_use]
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Sets the maximum batch size. Zero is treated as one.
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Sets the handler retry policy. Zero attempts is treated as one.
    #[must_use]
    pub fn with_handler_retry(mut self, retry: RetryPolicy) -> Self {
        self.handler_retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            delay: retry.delay,
        };
        self
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not running.
    Stopped,
    /// Loading the checkpoint and opening the log subscription.
    Starting,
    /// Receiving events.
    Subscribed,
    /// The last attempt dropped; waiting to resubscribe.
    Dropped,
}

enum Attempt {
    Cancelled,
    Dropped(String),
}

enum Delivery {
    Done,
    Cancelled,
    Dropped(String),
}

enum Handled {
    Ok,
    Failed { error: String, attempts: u32 },
    Cancelled,
}

/// A long-running subscription to every stream of the event log.
pub struct AllStreamSubscription {
    options: SubscriptionOptions,
    log: Arc<dyn EventLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    handler: Arc<dyn EventHandler>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<SubscriptionState>,
    resets: watch::Sender<u64>,
    running: Mutex<()>,
}

impl std::fmt::Debug for AllStreamSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllStreamSubscription")
            .field("options", &self.options)
            .field("handler", &self.handler.name())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl AllStreamSubscription {
    /// Creates a stopped subscription.
    #[must_use]
    pub fn new(
        options: SubscriptionOptions,
        log: Arc<dyn EventLog>,
        checkpoints: Arc<dyn CheckpointStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        handler: Arc<dyn EventHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Stopped);
        let (resets, _) = watch::channel(0);
        Self {
            options,
            log,
            checkpoints,
            dead_letters,
            handler,
            clock,
            state,
            resets,
            running: Mutex::new(()),
        }
    }

    /// The checkpoint key of this subscription.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.options.subscription_id
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Clears the stored checkpoint. A running subscription drops its
    /// current attempt and restarts from the beginning of the log once the
    /// batch in hand is finished.
    ///
    /// # Errors
    ///
    /// Returns the checkpoint store's error.
    pub async fn reset(&self) -> Result<(), DomainError> {
        info!(subscription_id = %self.options.subscription_id, "resetting checkpoint");
        self.checkpoints.reset(&self.options.subscription_id).await?;
        self.resets.send_modify(|count| *count += 1);
        Ok(())
    }

    /// Runs until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if this subscription is already
    /// running. Every other failure is logged and followed by a resubscribe.
    #[instrument(skip_all, fields(subscription_id = %self.options.subscription_id, handler = self.handler.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DomainError> {
        let _running = self.running.try_lock().map_err(|_| {
            DomainError::Validation(format!(
                "subscription {} is already running",
                self.options.subscription_id
            ))
        })?;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.state.send_replace(SubscriptionState::Starting);

            match self.run_once(&mut shutdown).await {
                Attempt::Cancelled => break,
                Attempt::Dropped(reason) => {
                    self.state.send_replace(SubscriptionState::Dropped);
                    warn!(
                        %reason,
                        delay_ms = u64::try_from(self.options.resubscribe_delay.as_millis())
                            .unwrap_or(u64::MAX),
                        "subscription dropped, resubscribing"
                    );
                    if sleep_or_shutdown(self.options.resubscribe_delay, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(SubscriptionState::Stopped);
        info!("subscription stopped");
        Ok(())
    }

    async fn run_once(&self, shutdown: &mut watch::Receiver<bool>) -> Attempt {
        let subscription_id = self.options.subscription_id.as_str();
        let mut resets = self.resets.subscribe();
        let mut checkpoint = match self.checkpoints.load(subscription_id).await {
            Ok(checkpoint) => checkpoint,
            Err(err) => return Attempt::Dropped(format!("loading checkpoint failed: {err}")),
        };

        let mut stream = self
            .log
            .subscribe_to_all(checkpoint, self.options.filter.clone());
        self.state.send_replace(SubscriptionState::Subscribed);
        info!(?checkpoint, "subscribed to all streams");

        loop {
            let next = tokio::select! {
                biased;
                () = wait_for_shutdown(shutdown) => return Attempt::Cancelled,
                _ = resets.changed() => return Attempt::Dropped("checkpoint reset".to_owned()),
                next = stream.next() => next,
            };
            let first = match next {
                Some(Ok(event)) => event,
                Some(Err(err)) => return Attempt::Dropped(err.to_string()),
                None => return Attempt::Dropped("event stream ended".to_owned()),
            };

            let (batch, pending_drop) = self.drain_ready(first, &mut stream);
            let Some(last_position) = batch.last().map(|event| event.position) else {
                continue;
            };

            let deliverable: Vec<RecordedEvent> = batch
                .into_iter()
                .filter(|event| {
                    !event.has_empty_payload() && !event.event_type().starts_with(SYSTEM_EVENT_PREFIX)
                })
                .collect();
            if !deliverable.is_empty() {
                match self.deliver(&deliverable, shutdown).await {
                    Delivery::Done => {}
                    Delivery::Cancelled => return Attempt::Cancelled,
                    Delivery::Dropped(reason) => return Attempt::Dropped(reason),
                }
            }

            match self
                .checkpoints
                .store(subscription_id, last_position, checkpoint)
                .await
            {
                Ok(StoreCheckpointResult::Success(position)) => checkpoint = Some(position),
                Ok(StoreCheckpointResult::Ignored) => {
                    debug!(position = last_position, "checkpoint already stored");
                    checkpoint = Some(last_position);
                }
                Ok(StoreCheckpointResult::Mismatch) => {
                    return Attempt::Dropped(format!(
                        "checkpoint mismatch storing {last_position} over {checkpoint:?}"
                    ));
                }
                Err(err) => return Attempt::Dropped(format!("storing checkpoint failed: {err}")),
            }

            if let Some(reason) = pending_drop {
                return Attempt::Dropped(reason);
            }
        }
    }

    /// Collects events that are already available without waiting, up to
    /// the batch size. A drop noticed while draining is reported after the
    /// collected events are processed.
    fn drain_ready(
        &self,
        first: RecordedEvent,
        stream: &mut EventStream<'_>,
    ) -> (Vec<RecordedEvent>, Option<String>) {
        let mut batch = vec![first];
        while batch.len() < self.options.max_batch_size {
            match stream.next().now_or_never() {
                Some(Some(Ok(event))) => batch.push(event),
                Some(Some(Err(err))) => return (batch, Some(err.to_string())),
                Some(None) => return (batch, Some("event stream ended".to_owned())),
                None => break,
            }
        }
        (batch, None)
    }

    /// Hands `batch` to the handler. A batch that keeps failing is split so
    /// that only the events that fail on their own are dead-lettered. The
    /// checkpoint must not move past an event whose dead letter could not be
    /// recorded, so that failure drops the attempt.
    async fn deliver(
        &self,
        batch: &[RecordedEvent],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Delivery {
        let first_position = batch.first().map(|event| event.position);
        let last_position = batch.last().map(|event| event.position);
        debug!(?first_position, ?last_position, count = batch.len(), "delivering batch");

        match self.handle_with_retry(batch, shutdown).await {
            Handled::Ok => Delivery::Done,
            Handled::Cancelled => Delivery::Cancelled,
            Handled::Failed { error, attempts } if batch.len() == 1 => {
                self.dead_letter(&batch[0], error, attempts).await
            }
            Handled::Failed { error, .. } => {
                warn!(%error, count = batch.len(), "batch failed, retrying events one by one");
                for event in batch {
                    if *shutdown.borrow() {
                        return Delivery::Cancelled;
                    }
                    match self
                        .handle_with_retry(std::slice::from_ref(event), shutdown)
                        .await
                    {
                        Handled::Ok => {}
                        Handled::Cancelled => return Delivery::Cancelled,
                        Handled::Failed { error, attempts } => {
                            if let Delivery::Dropped(reason) =
                                self.dead_letter(event, error, attempts).await
                            {
                                return Delivery::Dropped(reason);
                            }
                        }
                    }
                }
                Delivery::Done
            }
        }
    }

    async fn handle_with_retry(
        &self,
        events: &[RecordedEvent],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Handled {
        let policy = self.options.handler_retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handler.handle(events).await {
                Ok(()) => return Handled::Ok,
                Err(err) if attempt >= policy.max_attempts => {
                    return Handled::Failed {
                        error: err.to_string(),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    warn!(attempt, error = %err, "handler failed, retrying");
                    if sleep_or_shutdown(policy.delay, shutdown).await {
                        return Handled::Cancelled;
                    }
                }
            }
        }
    }

    async fn dead_letter(&self, event: &RecordedEvent, error: String, attempts: u32) -> Delivery {
        error!(
            position = event.position,
            stream_id = %event.stream_id(),
            event_type = event.event_type(),
            attempts,
            %error,
            "giving up on event, recording dead letter"
        );
        let dead_letter = DeadLetter {
            subscription_id: self.options.subscription_id.clone(),
            position: event.position,
            stream_id: event.stream_id(),
            event_id: event.event.event_id,
            event_type: event.event_type().to_owned(),
            payload: event.event.payload.clone(),
            error,
            attempts,
            failed_at: self.clock.now(),
        };
        match self.dead_letters.record(dead_letter).await {
            Ok(()) => Delivery::Done,
            Err(err) => Delivery::Dropped(format!(
                "recording dead letter for position {} failed: {err}",
                event.position
            )),
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleeps for `delay`. Returns `true` if shutdown interrupted the sleep.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        () = wait_for_shutdown(shutdown) => true,
        () = tokio::time::sleep(delay) => false,
    }
}
