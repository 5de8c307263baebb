//! Test command bus: records scheduled commands instead of delivering them.

use std::sync::Mutex;

use async_trait::async_trait;
use stayline_core::command::{Command, CommandBus};
use stayline_core::error::DomainError;

/// A command bus that records every scheduled command.
#[derive(Debug)]
pub struct RecordingCommandBus<C> {
    scheduled: Mutex<Vec<C>>,
    capacity: Mutex<Option<usize>>,
}

impl<C: Clone> RecordingCommandBus<C> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scheduled: Mutex::new(Vec::new()),
            capacity: Mutex::new(None),
        }
    }

    /// Accepts `accepted` more commands, then fails every `schedule` until
    /// [`RecordingCommandBus::recover`] is called.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_after(&self, accepted: usize) {
        *self.capacity.lock().unwrap() = Some(accepted);
    }

    /// Accepts every command again.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn recover(&self) {
        *self.capacity.lock().unwrap() = None;
    }

    /// Returns a snapshot of every scheduled command.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn scheduled(&self) -> Vec<C> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl<C: Clone> Default for RecordingCommandBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C> CommandBus<C> for RecordingCommandBus<C>
where
    C: Command + Clone + 'static,
{
    async fn schedule(&self, command: C) -> Result<(), DomainError> {
        if let Some(remaining) = self.capacity.lock().unwrap().as_mut() {
            if *remaining == 0 {
                return Err(DomainError::Infrastructure(
                    "simulated command bus failure".to_owned(),
                ));
            }
            *remaining -= 1;
        }
        self.scheduled.lock().unwrap().push(command);
        Ok(())
    }
}
