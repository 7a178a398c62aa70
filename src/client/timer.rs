//! # Cancelable Timers
//!
//! A `Debouncer` runs a callback once a quiet period has elapsed since the
//! last `schedule` call. Rescheduling replaces the pending callback;
//! cancelling or dropping the debouncer discards it.
//!
//! Timers run on the ambient tokio runtime, so tests can drive them with
//! paused time.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::shared::lock;

#[derive(Default)]
struct DebounceState {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Schedule / reschedule / cancel primitive
#[derive(Clone, Default)]
pub struct Debouncer {
    state: Arc<Mutex<DebounceState>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay`, replacing any pending callback
    pub fn schedule<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.state);
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
        state.generation += 1;
        let generation = state.generation;

        let shared = Arc::downgrade(&self.state);
        state.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            {
                let mut state = lock(&shared);
                // Superseded between wake-up and here
                if state.generation != generation {
                    return;
                }
                state.handle = None;
            }
            callback();
        }));
    }

    /// Drop the pending callback, if any
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
    }

    /// Whether a callback is waiting to fire
    pub fn is_pending(&self) -> bool {
        lock(&self.state).handle.is_some()
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Cancels on drop of the last clone
impl Drop for DebounceState {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
