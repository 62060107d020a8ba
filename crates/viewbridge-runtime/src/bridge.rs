//! Cross-thread call bridge
//!
//! [`Bridge`] is the only way the rest of the crate touches the engine. It offers:
//!
//! - [`post`](Bridge::post): always asynchronous, used for event delivery;
//! - [`run_or_post`](Bridge::run_or_post): inline on the owner thread, posted elsewhere,
//!   used for fire-and-forget mutators;
//! - [`call_and_wait`](Bridge::call_and_wait) / [`call_deferred`](Bridge::call_deferred):
//!   blocking calls that return the owner-thread result;
//! - [`call_async`](Bridge::call_async): non-blocking call whose result is posted back
//!   to a continuation;
//! - [`call`](Bridge::call): an awaitable call for async callers.
//!
//! # Waiting on the owner thread
//!
//! A blocking call issued *from* the owner thread cannot sleep: the work it waits for
//! sits in the very queue that thread is responsible for running. Instead the bridge
//! pumps the queue in short slices until the call's flag is set. Pumps may nest when a
//! pumped task itself makes a blocking call.
//!
//! # Example
//!
//! ```
//! use viewbridge_runtime::{Bridge, queue::OwnerThread};
//!
//! let owner = OwnerThread::spawn("engine").unwrap();
//! let bridge = Bridge::new(owner.queue().clone(), None);
//!
//! let name = bridge
//!     .call_and_wait(|| std::thread::current().name().map(str::to_string))
//!     .unwrap();
//! assert_eq!(name.as_deref(), Some("engine"));
//! ```

use crate::completion::{CompletionFlag, Completer, timeout_ms};
use crate::error::{BridgeError, BridgeResult};
use crate::queue::TaskQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// Length of one pump slice while waiting on the owner thread
const PUMP_SLICE: Duration = Duration::from_millis(1);

/// Thread-safe handle for running work on the owner thread
///
/// This handle is `Send + Sync + Clone` and can be freely shared across threads.
#[derive(Clone)]
pub struct Bridge {
    queue: Arc<TaskQueue>,
    call_timeout: Option<Duration>,
}

impl Bridge {
    /// Create a bridge over `queue`.
    ///
    /// `call_timeout` bounds every blocking call; `None` waits forever.
    pub fn new(queue: Arc<TaskQueue>, call_timeout: Option<Duration>) -> Self {
        Self {
            queue,
            call_timeout,
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Copy of this bridge with a different timeout
    pub fn with_timeout(&self, call_timeout: Option<Duration>) -> Self {
        Self {
            queue: self.queue.clone(),
            call_timeout,
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        self.queue.is_owner_thread()
    }

    /// Queue `work` for the owner thread; never runs inline
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.post(work);
    }

    /// Run `work` now if already on the owner thread, otherwise queue it
    pub fn run_or_post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_owner_thread() {
            work();
        } else {
            self.queue.post(work);
        }
    }

    /// Run `work` on the owner thread and wait for its result
    pub fn call_and_wait<R, F>(&self, work: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.call_deferred(move |completer| completer.complete(work()))
    }

    /// Run `work` on the owner thread and wait until it completes the [`Completer`].
    ///
    /// `work` may hand the completer to an engine callback that fires later; the wait
    /// ends when the completer is used or dropped.
    pub fn call_deferred<R, F>(&self, work: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(Completer<R>) + Send + 'static,
    {
        let flag = CompletionFlag::new();
        let completer = flag.completer();
        self.queue.post(move || work(completer));

        if self.is_owner_thread() {
            self.pump_until_finished(&flag)
        } else {
            flag.wait(self.call_timeout).inspect_err(|e| {
                if matches!(e, BridgeError::Timeout(_)) {
                    warn!(timeout_ms = timeout_ms(self.call_timeout), "Owner call timed out");
                }
            })
        }
    }

    /// Wait until everything posted before this call has run
    pub fn flush(&self) -> BridgeResult<()> {
        self.call_and_wait(|| ())
    }

    /// Run `work` on the owner thread without waiting.
    ///
    /// The result is delivered to `continuation` by a second task on the owner thread.
    pub fn call_async<R, F, C>(&self, work: F, continuation: C)
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        self.call_deferred_async(move |reply: Reply<R>| reply.send(work()), continuation);
    }

    /// Deferred-result counterpart of [`call_async`](Self::call_async)
    pub fn call_deferred_async<R, F, C>(&self, work: F, continuation: C)
    where
        R: Send + 'static,
        F: FnOnce(Reply<R>) + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        let reply = Reply {
            queue: self.queue.clone(),
            continuation: Box::new(continuation),
        };
        self.queue.post(move || work(reply));
    }

    /// Awaitable call for async callers.
    ///
    /// Must not be awaited on the owner thread itself: nothing would run the queue.
    pub async fn call<R, F>(&self, work: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_owner_thread() {
            return Err(BridgeError::invalid_state(
                "async calls cannot be awaited on the owner thread",
            ));
        }

        let (tx, rx) = oneshot::channel();
        self.queue.post(move || {
            let _ = tx.send(work());
        });

        let received = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| BridgeError::Timeout(limit.as_millis() as u64))?,
            None => rx.await,
        };
        received.map_err(|_| BridgeError::Abandoned)
    }

    fn pump_until_finished<R>(&self, flag: &CompletionFlag<R>) -> BridgeResult<R> {
        let depth = self.queue.enter_pump();
        scopeguard::defer! {
            self.queue.leave_pump();
        }
        trace!(depth, "Pumping owner queue for re-entrant call");

        let deadline = self.call_timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(result) = flag.try_take() {
                return result;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(depth, "Re-entrant owner call timed out");
                    return Err(BridgeError::Timeout(timeout_ms(self.call_timeout)));
                }
            }
            if self.queue.is_closed() {
                self.queue.pump_once(Duration::ZERO)?;
                return flag.try_take().unwrap_or(Err(BridgeError::QueueClosed));
            }
            self.queue.pump_once(PUMP_SLICE)?;
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("queue", &self.queue)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// Posts an owner-thread result back to a caller continuation
pub struct Reply<R> {
    queue: Arc<TaskQueue>,
    continuation: Box<dyn FnOnce(R) + Send + 'static>,
}

impl<R: Send + 'static> Reply<R> {
    /// Deliver `value` as a separate task
    pub fn send(self, value: R) {
        let continuation = self.continuation;
        self.queue.post(move || continuation(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OwnerThread;
    use parking_lot::Mutex;

    #[test]
    fn test_call_and_wait_from_other_thread() {
        let owner = OwnerThread::spawn("bridge-test").unwrap();
        let bridge = Bridge::new(owner.queue().clone(), Some(Duration::from_secs(5)));

        let on_owner = bridge
            .call_and_wait({
                let queue = owner.queue().clone();
                move || queue.is_owner_thread()
            })
            .unwrap();
        assert!(on_owner);
    }

    #[test]
    fn test_call_and_wait_on_owner_pumps() {
        let queue = TaskQueue::bind_current();
        let bridge = Bridge::new(queue.clone(), Some(Duration::from_secs(5)));
        let log = Arc::new(Mutex::new(Vec::new()));

        let earlier = log.clone();
        bridge.post(move || earlier.lock().push("queued earlier"));

        let inner = log.clone();
        let value = bridge
            .call_and_wait(move || {
                inner.lock().push("awaited work");
                42
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(*log.lock(), vec!["queued earlier", "awaited work"]);
    }

    #[test]
    fn test_call_deferred_completes_later() {
        let queue = TaskQueue::bind_current();
        let bridge = Bridge::new(queue.clone(), Some(Duration::from_secs(5)));

        let later = bridge.clone();
        let value = bridge
            .call_deferred(move |completer| {
                later.post(move || completer.complete("late"));
            })
            .unwrap();
        assert_eq!(value, "late");
    }

    #[test]
    fn test_owner_call_times_out() {
        let queue = TaskQueue::bind_current();
        let bridge = Bridge::new(queue, Some(Duration::from_millis(20)));

        let parked: Arc<Mutex<Option<Completer<u8>>>> = Arc::new(Mutex::new(None));
        let slot = parked.clone();
        let result = bridge.call_deferred(move |completer| {
            *slot.lock() = Some(completer);
        });

        assert!(matches!(result, Err(BridgeError::Timeout(20))));
    }

    #[test]
    fn test_abandoned_call_reports_error() {
        let queue = TaskQueue::bind_current();
        let bridge = Bridge::new(queue, None);

        let result: BridgeResult<u8> = bridge.call_deferred(|completer| drop(completer));
        assert!(matches!(result, Err(BridgeError::Abandoned)));
    }

    #[test]
    fn test_call_async_posts_result_back() {
        let queue = TaskQueue::bind_current();
        let bridge = Bridge::new(queue.clone(), None);
        let seen = Arc::new(Mutex::new(None));

        let sink = seen.clone();
        bridge.call_async(|| 6 * 7, move |value| *sink.lock() = Some(value));

        // Work and continuation are two separate tasks
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain().unwrap(), 2);
        assert_eq!(*seen.lock(), Some(42));
    }

    #[test]
    fn test_run_or_post_runs_inline_on_owner() {
        let queue = TaskQueue::bind_current();
        let bridge = Bridge::new(queue.clone(), None);
        let hit = Arc::new(Mutex::new(false));

        let flag = hit.clone();
        bridge.run_or_post(move || *flag.lock() = true);
        assert!(*hit.lock());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_async_call() {
        let owner = OwnerThread::spawn("bridge-async").unwrap();
        let bridge = Bridge::new(owner.queue().clone(), Some(Duration::from_secs(5)));

        let value = bridge.call(|| "from owner".to_string()).await.unwrap();
        assert_eq!(value, "from owner");
    }

    #[test]
    fn test_bridge_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        fn assert_clone<T: Clone>() {}

        assert_send::<Bridge>();
        assert_sync::<Bridge>();
        assert_clone::<Bridge>();
    }
}
