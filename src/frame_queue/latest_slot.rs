//! Single-slot, overwrite-on-write container

use parking_lot::Mutex;
use tokio::sync::Notify;

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

/// Holds at most one unread value; `set` replaces, `get` takes
pub struct LatestValueSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> LatestValueSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Install `value`, discarding any unread one
    ///
    /// Returns true if an unread value was overwritten. Writes after
    /// `close` are dropped.
    pub fn set(&self, value: T) -> bool {
        let replaced = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.value.replace(value).is_some()
        };
        self.notify.notify_one();
        replaced
    }

    /// Wait for a value, then take it
    ///
    /// Returns `None` once the slot is closed.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(value) = state.value.take() {
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Take the current value without waiting
    pub fn try_get(&self) -> Option<T> {
        self.state.lock().value.take()
    }

    pub fn has_value(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Discard any value and release every waiting reader
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.value = None;
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T> Default for LatestValueSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
