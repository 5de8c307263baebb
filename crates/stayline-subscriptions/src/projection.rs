//! Batch projection engine.
//!
//! Rules are registered per event type. A batch is folded in event order
//! against the documents loaded at the start of the batch, and each touched
//! document then produces at most one [`NetOperation`]: created-then-deleted
//! inside one batch writes nothing at all.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use stayline_core::document::{DocumentStore, NetOperation, Versioned};
use stayline_core::error::DomainError;
use stayline_core::event_log::RecordedEvent;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::handler::EventHandler;

type Mutation<V> = Box<dyn FnOnce(&mut V) + Send>;

enum Intent<V> {
    Create(V),
    Update(Mutation<V>),
    Delete,
}

type Rule<V> = Box<dyn Fn(&RecordedEvent) -> Result<(Uuid, Intent<V>), DomainError> + Send + Sync>;

struct Slot<V> {
    existed: bool,
    current: Option<V>,
    last_position: Option<i64>,
    changed: bool,
}

fn decode<E: DeserializeOwned>(event: &RecordedEvent) -> Result<E, DomainError> {
    serde_json::from_value(event.event.payload.clone()).map_err(|e| {
        DomainError::Infrastructure(format!(
            "projection could not decode {} at position {}: {e}",
            event.event_type(),
            event.position
        ))
    })
}

/// Folds events into documents of type `V` kept in a [`DocumentStore`].
pub struct ProjectionApplier<V> {
    name: String,
    store: Arc<dyn DocumentStore<V>>,
    rules: HashMap<&'static str, Rule<V>>,
}

impl<V> std::fmt::Debug for ProjectionApplier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut event_types: Vec<_> = self.rules.keys().collect();
        event_types.sort();
        f.debug_struct("ProjectionApplier")
            .field("name", &self.name)
            .field("event_types", &event_types)
            .finish_non_exhaustive()
    }
}

impl<V> ProjectionApplier<V>
where
    V: Send + Sync + 'static,
{
    /// Creates a projection with no rules.
    #[must_use]
    pub fn new(name: impl Into<String>, store: Arc<dyn DocumentStore<V>>) -> Self {
        Self {
            name: name.into(),
            store,
            rules: HashMap::new(),
        }
    }

    /// `event_type` creates the document `id(payload)` from `factory`. A
    /// create for a document that already exists is ignored.
    #[must_use]
    pub fn creates<E, I, F>(mut self, event_type: &'static str, id: I, factory: F) -> Self
    where
        E: DeserializeOwned + 'static,
        I: Fn(&E) -> Uuid + Send + Sync + 'static,
        F: Fn(&E, &RecordedEvent) -> V + Send + Sync + 'static,
    {
        self.rules.insert(
            event_type,
            Box::new(move |event| {
                let payload: E = decode(event)?;
                Ok((id(&payload), Intent::Create(factory(&payload, event))))
            }),
        );
        self
    }

    /// `event_type` updates the document `id(payload)` in place. An update
    /// for a document that does not exist is logged and skipped.
    #[must_use]
    pub fn projects<E, I, U>(mut self, event_type: &'static str, id: I, updater: U) -> Self
    where
        E: DeserializeOwned + Send + 'static,
        I: Fn(&E) -> Uuid + Send + Sync + 'static,
        U: Fn(&E, &mut V) + Send + Sync + 'static,
    {
        let updater = Arc::new(updater);
        self.rules.insert(
            event_type,
            Box::new(move |event| {
                let payload: E = decode(event)?;
                let target = id(&payload);
                let updater = Arc::clone(&updater);
                let mutation: Mutation<V> = Box::new(move |document| updater(&payload, document));
                Ok((target, Intent::Update(mutation)))
            }),
        );
        self
    }

    /// `event_type` deletes the document `id(payload)`. Deleting a missing
    /// document is a no-op.
    #[must_use]
    pub fn deletes<E, I>(mut self, event_type: &'static str, id: I) -> Self
    where
        E: DeserializeOwned + 'static,
        I: Fn(&E) -> Uuid + Send + Sync + 'static,
    {
        self.rules.insert(
            event_type,
            Box::new(move |event| {
                let payload: E = decode(event)?;
                Ok((id(&payload), Intent::Delete))
            }),
        );
        self
    }

    /// The event types this projection reacts to.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.keys().copied()
    }

    /// Folds `events` and commits one net operation per touched document.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if a payload cannot be decoded
    /// or the store fails. Nothing is written in that case.
    #[instrument(skip_all, fields(projection = %self.name, count = events.len()))]
    pub async fn apply(&self, events: &[RecordedEvent]) -> Result<(), DomainError> {
        let mut intents = Vec::new();
        for event in events {
            if let Some(rule) = self.rules.get(event.event_type()) {
                let (id, intent) = rule(event)?;
                intents.push((event.position, id, intent));
            }
        }
        if intents.is_empty() {
            return Ok(());
        }

        let mut order: Vec<Uuid> = Vec::new();
        for (_, id, _) in &intents {
            if !order.contains(id) {
                order.push(*id);
            }
        }
        let mut existing = self.store.load(&order).await?;
        let mut slots: HashMap<Uuid, Slot<V>> = order
            .iter()
            .map(|id| {
                let slot = match existing.remove(id) {
                    Some(versioned) => Slot {
                        existed: true,
                        current: Some(versioned.document),
                        last_position: Some(versioned.last_position),
                        changed: false,
                    },
                    None => Slot {
                        existed: false,
                        current: None,
                        last_position: None,
                        changed: false,
                    },
                };
                (*id, slot)
            })
            .collect();

        for (position, id, intent) in intents {
            let Some(slot) = slots.get_mut(&id) else {
                continue;
            };
            if slot.last_position.is_some_and(|last| position <= last) {
                debug!(%id, position, "event already folded into document, skipping");
                continue;
            }
            match intent {
                Intent::Create(document) => {
                    if slot.current.is_some() {
                        warn!(%id, position, "document already exists, create ignored");
                        continue;
                    }
                    slot.current = Some(document);
                }
                Intent::Update(mutation) => {
                    let Some(document) = slot.current.as_mut() else {
                        warn!(%id, position, "document not found, update skipped");
                        continue;
                    };
                    mutation(document);
                }
                Intent::Delete => {
                    if slot.current.take().is_none() {
                        continue;
                    }
                }
            }
            slot.last_position = Some(position);
            slot.changed = true;
        }

        let operations: Vec<NetOperation<V>> = order
            .into_iter()
            .filter_map(|id| {
                let slot = slots.remove(&id)?;
                net_operation(id, slot)
            })
            .collect();

        if operations.is_empty() {
            return Ok(());
        }
        debug!(operations = operations.len(), "committing projection batch");
        self.store.commit(operations).await
    }
}

fn net_operation<V>(id: Uuid, slot: Slot<V>) -> Option<NetOperation<V>> {
    let last_position = slot.last_position.unwrap_or_default();
    match (slot.existed, slot.current) {
        (false, None) => None,
        (false, Some(document)) => Some(NetOperation::Insert {
            id,
            document: Versioned {
                document,
                last_position,
            },
        }),
        (true, None) => Some(NetOperation::Delete { id }),
        (true, Some(document)) if slot.changed => Some(NetOperation::Update {
            id,
            document: Versioned {
                document,
                last_position,
            },
        }),
        (true, Some(_)) => None,
    }
}

#[async_trait]
impl<V> EventHandler for ProjectionApplier<V>
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, events: &[RecordedEvent]) -> Result<(), DomainError> {
        self.apply(events).await
    }
}
