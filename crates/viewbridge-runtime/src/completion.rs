//! Completion flags for blocking calls
//!
//! A [`CompletionFlag`] is shared between the thread waiting for an owner-thread
//! operation and the task performing it. The task side holds a [`Completer`], a
//! move-only, single-use setter, so the flag goes from unset to set at most once per
//! wait. A completer dropped without being used marks the flag abandoned, which wakes
//! the waiter with [`BridgeError::Abandoned`] instead of leaving it blocked.

use crate::error::{BridgeError, BridgeResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observable state of a [`CompletionFlag`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    /// Operation pending
    Unset,
    /// Operation finished; the result is available
    Set,
    /// The completing side went away without a result
    Abandoned,
}

enum Slot<T> {
    Unset,
    Set(T),
    Taken,
    Abandoned,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    signal: Condvar,
}

/// Reference-counted readiness signal with a result slot
pub struct CompletionFlag<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CompletionFlag<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for CompletionFlag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionFlag<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Unset),
                signal: Condvar::new(),
            }),
        }
    }

    /// Create the setter for this flag
    pub fn completer(&self) -> Completer<T> {
        Completer {
            shared: Some(self.shared.clone()),
        }
    }

    pub fn state(&self) -> FlagState {
        match *self.shared.slot.lock() {
            Slot::Unset => FlagState::Unset,
            Slot::Set(_) | Slot::Taken => FlagState::Set,
            Slot::Abandoned => FlagState::Abandoned,
        }
    }

    pub fn is_set(&self) -> bool {
        self.state() == FlagState::Set
    }

    /// Whether the flag left the unset state, either set or abandoned
    pub fn is_finished(&self) -> bool {
        self.state() != FlagState::Unset
    }

    /// Return the flag to unset so it can track another call.
    ///
    /// Any unread result is discarded. Completers created before the reset still refer
    /// to this flag, so a reset must only happen once the previous call finished.
    pub fn reset(&self) {
        *self.shared.slot.lock() = Slot::Unset;
    }

    /// Take the result without waiting.
    ///
    /// Returns `None` while the flag is unset.
    pub fn try_take(&self) -> Option<BridgeResult<T>> {
        let mut slot = self.shared.slot.lock();
        Self::take_locked(&mut slot)
    }

    /// Block until the flag is set or abandoned, or until `timeout` elapses.
    ///
    /// `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> BridgeResult<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.shared.slot.lock();

        loop {
            if let Some(result) = Self::take_locked(&mut slot) {
                return result;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.signal.wait_until(&mut slot, deadline).timed_out() {
                        if let Some(result) = Self::take_locked(&mut slot) {
                            return result;
                        }
                        return Err(BridgeError::Timeout(timeout_ms(timeout)));
                    }
                }
                None => self.shared.signal.wait(&mut slot),
            }
        }
    }

    fn take_locked(slot: &mut Slot<T>) -> Option<BridgeResult<T>> {
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Unset => {
                *slot = Slot::Unset;
                None
            }
            Slot::Set(value) => Some(Ok(value)),
            Slot::Taken => Some(Err(BridgeError::invalid_state(
                "completion result already taken",
            ))),
            Slot::Abandoned => {
                *slot = Slot::Abandoned;
                Some(Err(BridgeError::Abandoned))
            }
        }
    }
}

impl<T> std::fmt::Debug for CompletionFlag<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionFlag")
            .field("state", &self.state())
            .finish()
    }
}

/// Single-use setter for a [`CompletionFlag`]
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    /// Store the result and wake the waiter
    pub fn complete(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            let mut slot = shared.slot.lock();
            if matches!(*slot, Slot::Unset) {
                *slot = Slot::Set(value);
            }
            shared.signal.notify_all();
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut slot = shared.slot.lock();
            if matches!(*slot, Slot::Unset) {
                *slot = Slot::Abandoned;
            }
            shared.signal.notify_all();
        }
    }
}

pub(crate) fn timeout_ms(timeout: Option<Duration>) -> u64 {
    timeout.map(|t| t.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_wait() {
        let flag = CompletionFlag::new();
        assert_eq!(flag.state(), FlagState::Unset);

        flag.completer().complete(7);
        assert!(flag.is_set());
        assert_eq!(flag.wait(None).unwrap(), 7);
    }

    #[test]
    fn test_wait_across_threads() {
        let flag = CompletionFlag::new();
        let completer = flag.completer();

        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete("done".to_string());
        });

        let value = flag.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(value, "done");
        setter.join().unwrap();
    }

    #[test]
    fn test_dropped_completer_abandons() {
        let flag = CompletionFlag::<u32>::new();
        drop(flag.completer());

        assert_eq!(flag.state(), FlagState::Abandoned);
        assert!(matches!(flag.wait(None), Err(BridgeError::Abandoned)));
    }

    #[test]
    fn test_wait_times_out() {
        let flag = CompletionFlag::<u32>::new();
        let _completer = flag.completer();

        let result = flag.wait(Some(Duration::from_millis(10)));
        assert!(matches!(result, Err(BridgeError::Timeout(10))));
    }

    #[test]
    fn test_reset_allows_reuse() {
        let flag = CompletionFlag::new();
        flag.completer().complete(1);
        assert_eq!(flag.try_take().unwrap().unwrap(), 1);

        flag.reset();
        assert_eq!(flag.state(), FlagState::Unset);
        assert!(flag.try_take().is_none());

        flag.completer().complete(2);
        assert_eq!(flag.wait(None).unwrap(), 2);
    }

    #[test]
    fn test_second_take_reports_error() {
        let flag = CompletionFlag::new();
        flag.completer().complete(());
        assert!(flag.try_take().unwrap().is_ok());
        assert!(flag.try_take().unwrap().is_err());
    }
}
