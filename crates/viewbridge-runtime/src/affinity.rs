//! Owner-thread affinity for engine objects.
//!
//! Engine objects are `!Send`: they may only be touched on the thread that owns the
//! engine. [`OwnerBound<T>`] lets bridge entities (which are shared across threads)
//! carry such objects anyway:
//!
//! - access is checked: [`OwnerBound::get`] fails with [`BridgeError::WrongThread`]
//!   anywhere but the owner thread;
//! - destruction is deferred: if the wrapper is dropped on another thread, the value
//!   is moved into a task and dropped on the owner thread.
//!
//! If the owner queue is already gone the value is leaked rather than dropped on the
//! wrong thread.

use crate::error::{BridgeError, BridgeResult};
use crate::queue::TaskQueue;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use tracing::trace;

/// A value that may only be used on its owner thread
pub struct OwnerBound<T: 'static> {
    value: ManuallyDrop<T>,
    owner: ThreadId,
    queue: Weak<TaskQueue>,
}

// SAFETY: the wrapped value is only reachable through `get`/`with`, which check that
// the caller is on the owner thread, and `Drop` hands the value back to the owner
// thread (or leaks it). No two threads can observe `&T` at the same time.
unsafe impl<T: 'static> Send for OwnerBound<T> {}
unsafe impl<T: 'static> Sync for OwnerBound<T> {}

impl<T: 'static> OwnerBound<T> {
    /// Wrap `value`, which was created on the queue's owner thread
    pub fn new(queue: &Arc<TaskQueue>, value: T) -> BridgeResult<Self> {
        queue.ensure_owner_thread()?;
        Ok(Self {
            value: ManuallyDrop::new(value),
            owner: queue.owner_thread(),
            queue: Arc::downgrade(queue),
        })
    }

    pub fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Borrow the value; only allowed on the owner thread
    pub fn get(&self) -> BridgeResult<&T> {
        if self.is_owner_thread() {
            Ok(&self.value)
        } else {
            Err(BridgeError::WrongThread)
        }
    }

    /// Run `f` against the value on the owner thread
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> BridgeResult<R> {
        self.get().map(f)
    }
}

impl<T: 'static> Drop for OwnerBound<T> {
    fn drop(&mut self) {
        // SAFETY: `value` is taken exactly once, here, and never used afterwards.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        let pending = OwnerDrop {
            value: ManuallyDrop::new(value),
            owner: self.owner,
        };

        if self.is_owner_thread() {
            drop(pending);
            return;
        }

        match self.queue.upgrade() {
            Some(queue) if !queue.is_closed() => {
                trace!("Deferring engine object drop to owner thread");
                queue.post(move || drop(pending));
            }
            _ => {
                trace!("Owner queue gone, leaking engine object");
                drop(pending);
            }
        }
    }
}

impl<T: 'static> std::fmt::Debug for OwnerBound<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerBound")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Value in transit back to its owner thread for destruction
struct OwnerDrop<T> {
    value: ManuallyDrop<T>,
    owner: ThreadId,
}

// SAFETY: the value is only dropped when the current thread is the owner thread;
// on any other thread it is leaked, so moving the container between threads never
// touches the value.
unsafe impl<T> Send for OwnerDrop<T> {}

impl<T> Drop for OwnerDrop<T> {
    fn drop(&mut self) {
        if std::thread::current().id() == self.owner {
            // SAFETY: dropped once, on the owner thread.
            unsafe { ManuallyDrop::drop(&mut self.value) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DropProbe {
        owner: ThreadId,
        dropped_on_owner: Arc<AtomicUsize>,
        _not_send: Rc<Cell<u8>>,
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            if std::thread::current().id() == self.owner {
                self.dropped_on_owner.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn probe(counter: &Arc<AtomicUsize>) -> DropProbe {
        DropProbe {
            owner: std::thread::current().id(),
            dropped_on_owner: counter.clone(),
            _not_send: Rc::new(Cell::new(0)),
        }
    }

    #[test]
    fn test_access_only_on_owner() {
        let queue = TaskQueue::bind_current();
        let bound = Arc::new(OwnerBound::new(&queue, Rc::new(5)).unwrap());

        assert_eq!(**bound.get().unwrap(), 5);

        let remote = bound.clone();
        let result = std::thread::spawn(move || remote.get().map(|v| **v))
            .join()
            .unwrap();
        assert!(matches!(result, Err(BridgeError::WrongThread)));
    }

    #[test]
    fn test_wrap_requires_owner_thread() {
        let queue = TaskQueue::bind_current();
        let remote = queue.clone();
        let result = std::thread::spawn(move || OwnerBound::new(&remote, 1u8).is_ok())
            .join()
            .unwrap();
        assert!(!result);
    }

    #[test]
    fn test_drop_on_other_thread_is_deferred() {
        let queue = TaskQueue::bind_current();
        let counter = Arc::new(AtomicUsize::new(0));
        let bound = OwnerBound::new(&queue, probe(&counter)).unwrap();

        std::thread::spawn(move || drop(bound)).join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);

        queue.drain().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_on_owner_is_immediate() {
        let queue = TaskQueue::bind_current();
        let counter = Arc::new(AtomicUsize::new(0));
        drop(OwnerBound::new(&queue, probe(&counter)).unwrap());

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }
}
