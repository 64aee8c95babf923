//! Run-wide cancellation signal.
//!
//! A [`CancelToken`] is cloned into whatever needs to stop a run (a signal
//! handler, a UI button, a test). Running steps register a watcher that posts a
//! cancellation event into their completion race, so cancellation wakes the
//! step immediately instead of being noticed on the next poll.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

type Watcher = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    next_id: u64,
    watchers: Vec<(u64, Watcher)>,
}

/// Cloneable handle; all clones observe the same cancellation.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<Mutex<CancelState>>,
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and notify every registered watcher. Later calls are no-ops.
    pub fn cancel(&self) {
        let watchers = {
            let mut state = self.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            mem::take(&mut state.watchers)
        };
        // Watchers run outside the lock so they may touch the token themselves.
        for (_, watcher) in watchers {
            watcher();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Run `on_cancel` when the token is cancelled.
    ///
    /// Runs immediately when already cancelled. Dropping the returned guard
    /// unregisters a watcher that has not fired yet.
    pub fn watch(&self, on_cancel: impl FnOnce() + Send + 'static) -> CancelWatch {
        let mut state = self.lock();
        if state.cancelled {
            drop(state);
            on_cancel();
            return CancelWatch {
                token: None,
                id: 0,
            };
        }
        let id = state.next_id;
        state.next_id += 1;
        state.watchers.push((id, Box::new(on_cancel)));
        CancelWatch {
            token: Some(self.clone()),
            id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CancelState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registration returned by [`CancelToken::watch`].
#[must_use = "dropping the guard unregisters the watcher"]
pub struct CancelWatch {
    token: Option<CancelToken>,
    id: u64,
}

impl Drop for CancelWatch {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.lock().watchers.retain(|(id, _)| *id != self.id);
        }
    }
}
