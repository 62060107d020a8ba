//! Owner-thread task queue
//!
//! A [`TaskQueue`] is bound to exactly one thread when it is created. Any thread may
//! [`post`](TaskQueue::post) work to it; only the bound thread may run that work, via
//! [`drain`](TaskQueue::drain), [`pump_once`](TaskQueue::pump_once) or the
//! [`OwnerThread`] loop.
//!
//! Items run strictly in post order. Work posted while another item is running is
//! appended behind everything already queued.
//!
//! ## Teardown
//!
//! Closing a queue drops every item that has not been dispatched yet. The items are
//! never run; the number dropped is logged and counted in [`QueueStats::dropped`].
//! Dropping an item drops whatever it captured, so a pending
//! [`Completer`](crate::completion::Completer) marks its waiting caller as abandoned.

use crate::error::{BridgeError, BridgeResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info_span, trace, warn};

/// A deferred, run-once unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Item carried by the queue channel
pub(crate) enum Job {
    /// Run a task on the owner thread
    Run(Task),
    /// Wake the owner so it notices the queue was closed
    Shutdown,
}

/// Statistics about queue operation
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Tasks accepted by `post`
    pub posted: AtomicU64,
    /// Tasks that ran (including ones that panicked)
    pub executed: AtomicU64,
    /// Tasks that panicked while running
    pub panicked: AtomicU64,
    /// Tasks discarded because the queue was closed
    pub dropped: AtomicU64,
}

impl QueueStats {
    /// Get snapshot of current stats
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            posted: self.posted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub posted: u64,
    pub executed: u64,
    pub panicked: u64,
    pub dropped: u64,
}

impl QueueStatsSnapshot {
    /// Tasks accepted but neither run nor dropped yet
    pub fn pending(&self) -> u64 {
        self.posted
            .saturating_sub(self.executed)
            .saturating_sub(self.dropped)
    }
}

/// Single-threaded FIFO of deferred work bound to one owner thread
pub struct TaskQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    owner: ThreadId,
    owner_name: String,
    closed: AtomicBool,
    /// Nesting level of re-entrant pumps on the owner thread
    depth: AtomicUsize,
    stats: QueueStats,
}

impl TaskQueue {
    /// Create a queue bound to the calling thread
    pub fn bind_current() -> Arc<Self> {
        let current = std::thread::current();
        let (tx, rx) = unbounded();
        Arc::new(Self {
            tx,
            rx,
            owner: current.id(),
            owner_name: current.name().unwrap_or("owner").to_string(),
            closed: AtomicBool::new(false),
            depth: AtomicUsize::new(0),
            stats: QueueStats::default(),
        })
    }

    /// Identity of the bound thread
    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// Name of the bound thread, for diagnostics
    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Fail with [`BridgeError::WrongThread`] unless called on the owner thread
    pub fn ensure_owner_thread(&self) -> BridgeResult<()> {
        if self.is_owner_thread() {
            Ok(())
        } else {
            Err(BridgeError::WrongThread)
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of items waiting to run
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Enqueue `work` for the owner thread.
    ///
    /// Never blocks and never fails. Work posted after the queue was closed is dropped
    /// without running.
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(owner = %self.owner_name, "Task posted to closed queue was dropped");
            return;
        }

        self.stats.posted.fetch_add(1, Ordering::Relaxed);
        // The receiver lives as long as `self`, so the send cannot observe a disconnect.
        if self.tx.send(Job::Run(Box::new(work))).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Run queued items until the queue is momentarily empty.
    ///
    /// Items posted by the items being run are picked up in the same drain. Returns the
    /// number of items that ran.
    pub fn drain(&self) -> BridgeResult<usize> {
        self.ensure_owner_thread()?;

        let mut ran = 0;
        loop {
            if self.is_closed() {
                self.discard_pending();
                break;
            }
            match self.rx.try_recv() {
                Ok(Job::Run(task)) => {
                    self.run(task);
                    ran += 1;
                }
                Ok(Job::Shutdown) => {
                    self.discard_pending();
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(ran)
    }

    /// Wait up to `timeout` for one item and run it.
    ///
    /// Returns `true` if an item ran.
    pub fn pump_once(&self, timeout: Duration) -> BridgeResult<bool> {
        self.ensure_owner_thread()?;

        if self.is_closed() {
            self.discard_pending();
            return Ok(false);
        }

        match self.rx.recv_timeout(timeout) {
            Ok(Job::Run(task)) => {
                self.run(task);
                Ok(true)
            }
            Ok(Job::Shutdown) => {
                self.discard_pending();
                Ok(false)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::QueueClosed),
        }
    }

    /// Owner loop for a dedicated thread: run items until the queue is closed.
    pub fn run_until_closed(&self) -> BridgeResult<()> {
        self.ensure_owner_thread()?;

        let _span = info_span!("owner", name = %self.owner_name).entered();
        debug!("Owner loop starting");

        loop {
            if self.is_closed() {
                debug!("Owner queue closed");
                break;
            }

            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(Job::Run(task)) => self.run(task),
                Ok(Job::Shutdown) => {
                    debug!("Owner shutdown signal received");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Owner channel disconnected");
                    break;
                }
            }
        }

        self.discard_pending();
        debug!("Owner loop stopped");
        Ok(())
    }

    /// Close the queue from any thread.
    ///
    /// Items that have not started are dropped the next time the owner touches the
    /// queue (or when the queue itself is dropped).
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(owner = %self.owner_name, pending = self.rx.len(), "Closing owner queue");
        let _ = self.tx.send(Job::Shutdown);
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub(crate) fn enter_pump(&self) -> usize {
        self.depth.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn leave_pump(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }

    fn run(&self, task: Task) {
        trace!(depth = self.depth(), "Running owner task");
        let outcome = catch_unwind(AssertUnwindSafe(task));
        self.stats.executed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_err() {
            self.stats.panicked.fetch_add(1, Ordering::Relaxed);
            error!(owner = %self.owner_name, "Owner task panicked");
        }
    }

    fn discard_pending(&self) {
        self.closed.store(true, Ordering::Release);
        let mut dropped = 0u64;
        for job in self.rx.try_iter() {
            if let Job::Run(task) = job {
                drop(task);
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.stats.dropped.fetch_add(dropped, Ordering::Relaxed);
            warn!(owner = %self.owner_name, dropped, "Dropped undispatched tasks at teardown");
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.discard_pending();
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("owner", &self.owner_name)
            .field("pending", &self.rx.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A dedicated, named thread that owns a [`TaskQueue`] and runs it until closed
pub struct OwnerThread {
    queue: Arc<TaskQueue>,
    handle: Option<JoinHandle<()>>,
}

impl OwnerThread {
    /// Spawn the thread and wait until its queue is bound
    pub fn spawn(name: impl Into<String>) -> BridgeResult<Self> {
        let name = name.into();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Arc<TaskQueue>>(1);

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let queue = TaskQueue::bind_current();
                if ready_tx.send(queue.clone()).is_err() {
                    return;
                }
                if let Err(e) = queue.run_until_closed() {
                    error!(error = %e, "Owner loop failed");
                }
            })
            .map_err(|e| BridgeError::Spawn(format!("{}: {}", name, e)))?;

        let queue = ready_rx
            .recv()
            .map_err(|_| BridgeError::Spawn(format!("{} exited during startup", name)))?;

        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Close the queue and wait for the thread to exit.
    ///
    /// When called from the owner thread itself the thread is detached instead of joined.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.queue.close();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.queue.is_owner_thread() {
            debug!("Owner thread stopping itself, detaching");
            return;
        }
        if handle.join().is_err() {
            error!("Owner thread panicked during shutdown");
        }
    }
}

impl Drop for OwnerThread {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_drain_runs_in_post_order() {
        let queue = TaskQueue::bind_current();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let log = log.clone();
            queue.post(move || log.lock().push(i));
        }

        assert_eq!(queue.drain().unwrap(), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_picks_up_follow_up_tasks() {
        let queue = TaskQueue::bind_current();
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_queue = queue.clone();
        let inner_log = log.clone();
        queue.post(move || {
            inner_log.lock().push("first");
            let log = inner_log.clone();
            inner_queue.post(move || log.lock().push("follow-up"));
        });

        assert_eq!(queue.drain().unwrap(), 2);
        assert_eq!(*log.lock(), vec!["first", "follow-up"]);
    }

    #[test]
    fn test_drain_from_other_thread_is_rejected() {
        let queue = TaskQueue::bind_current();
        let remote = queue.clone();

        let result = std::thread::spawn(move || remote.drain()).join().unwrap();
        assert!(matches!(result, Err(BridgeError::WrongThread)));
    }

    #[test]
    fn test_panicking_task_does_not_stop_drain() {
        let queue = TaskQueue::bind_current();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.post(|| panic!("boom"));
        let after = log.clone();
        queue.post(move || after.lock().push(1));

        assert_eq!(queue.drain().unwrap(), 2);
        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(queue.stats().snapshot().panicked, 1);
    }

    #[test]
    fn test_close_drops_pending_tasks() {
        let queue = TaskQueue::bind_current();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let ran = ran.clone();
            queue.post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        queue.close();
        assert_eq!(queue.drain().unwrap(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let stats = queue.stats().snapshot();
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.pending(), 0);

        // Posting after close drops immediately
        queue.post(|| {});
        assert_eq!(queue.stats().snapshot().dropped, 4);
    }

    #[test]
    fn test_pump_once_times_out_when_idle() {
        let queue = TaskQueue::bind_current();
        assert!(!queue.pump_once(Duration::from_millis(1)).unwrap());

        queue.post(|| {});
        assert!(queue.pump_once(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_owner_thread_runs_posted_work() {
        let owner = OwnerThread::spawn("viewbridge-test-owner").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        owner.queue().post(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("viewbridge-test-owner"));
        assert!(!owner.queue().is_owner_thread());

        owner.stop();
    }

    #[test]
    fn test_queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<TaskQueue>();
        assert_sync::<TaskQueue>();
        assert_send::<OwnerThread>();
    }
}
