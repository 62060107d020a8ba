//! Integration tests for the owner-thread queue and the call bridge

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use viewbridge_runtime::completion::{CompletionFlag, FlagState};
use viewbridge_runtime::{Bridge, BridgeError, OwnerThread, TaskQueue};

fn owner(name: &str) -> (OwnerThread, Bridge) {
    let owner = OwnerThread::spawn(name).unwrap();
    let bridge = Bridge::new(owner.queue().clone(), Some(Duration::from_secs(5)));
    (owner, bridge)
}

#[test]
fn test_concurrent_posts_run_in_post_order_one_at_a_time() {
    let (owner, bridge) = owner("p1-owner");
    let post_lock = Arc::new(Mutex::new(0usize));
    let executed = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let posters: Vec<_> = (0..4)
        .map(|_| {
            let bridge = bridge.clone();
            let post_lock = post_lock.clone();
            let executed = executed.clone();
            let in_flight = in_flight.clone();
            let overlaps = overlaps.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    // Sequence numbers are taken under the same lock as the post, so
                    // their order is the post order
                    let mut next = post_lock.lock();
                    let seq = *next;
                    *next += 1;
                    let executed = executed.clone();
                    let in_flight = in_flight.clone();
                    let overlaps = overlaps.clone();
                    bridge.post(move || {
                        if in_flight.swap(true, Ordering::AcqRel) {
                            overlaps.fetch_add(1, Ordering::Relaxed);
                        }
                        executed.lock().push(seq);
                        in_flight.store(false, Ordering::Release);
                    });
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    bridge.flush().unwrap();
    let executed = executed.lock().clone();
    assert_eq!(executed, (0..200).collect::<Vec<_>>());
    assert_eq!(overlaps.load(Ordering::Relaxed), 0);
    owner.stop();
}

#[test]
fn test_owner_wait_on_queued_work_completes() {
    let (owner, bridge) = owner("p2-owner");
    let order = Arc::new(Mutex::new(Vec::new()));

    let inner = bridge.clone();
    let log = order.clone();
    let answer = bridge
        .call_and_wait(move || {
            let queued = log.clone();
            inner.post(move || queued.lock().push("queued before the wait"));
            let waited = log.clone();
            inner.call_and_wait(move || {
                waited.lock().push("waited-for work");
                42
            })
        })
        .unwrap()
        .unwrap();

    assert_eq!(answer, 42);
    assert_eq!(
        *order.lock(),
        vec!["queued before the wait", "waited-for work"]
    );
    owner.stop();
}

#[test]
fn test_nested_owner_waits() {
    let (owner, bridge) = owner("nested-owner");
    let outer = bridge.clone();
    let value = bridge
        .call_and_wait(move || {
            let middle = outer.clone();
            outer.call_and_wait(move || middle.call_and_wait(|| "deep").unwrap_or("lost"))
        })
        .unwrap()
        .unwrap();
    assert_eq!(value, "deep");
    owner.stop();
}

#[test]
fn test_non_owner_wait_returns_exact_value() {
    let (owner, bridge) = owner("p3-owner");
    let (thread, values) = bridge
        .call_and_wait(|| {
            (
                std::thread::current().name().map(str::to_string),
                vec![1u64, 1 << 40, u64::MAX],
            )
        })
        .unwrap();
    assert_eq!(thread.as_deref(), Some("p3-owner"));
    assert_eq!(values, vec![1u64, 1 << 40, u64::MAX]);
    owner.stop();
}

#[test]
fn test_follow_up_task_runs_after_earlier_posts() {
    let queue = TaskQueue::bind_current();
    let order = Arc::new(Mutex::new(Vec::new()));

    let poster_queue = queue.clone();
    let poster_order = order.clone();
    std::thread::spawn(move || {
        let log = poster_order.clone();
        poster_queue.post(move || log.lock().push("T1"));

        let log = poster_order.clone();
        let follow_up_queue = poster_queue.clone();
        poster_queue.post(move || {
            log.lock().push("T2");
            let log = log.clone();
            follow_up_queue.post(move || log.lock().push("T4"));
        });

        let log = poster_order.clone();
        poster_queue.post(move || log.lock().push("T3"));
    })
    .join()
    .unwrap();

    assert_eq!(queue.drain().unwrap(), 4);
    assert_eq!(*order.lock(), vec!["T1", "T2", "T3", "T4"]);
}

#[test]
fn test_deferred_call_times_out() {
    let owner = OwnerThread::spawn("timeout-owner").unwrap();
    let bridge = Bridge::new(owner.queue().clone(), Some(Duration::from_millis(50)));
    let parked = Arc::new(Mutex::new(None));

    let slot = parked.clone();
    let result: Result<u32, _> = bridge.call_deferred(move |completer| {
        *slot.lock() = Some(completer);
    });
    assert!(matches!(result, Err(BridgeError::Timeout(50))));

    // Completing late is harmless
    if let Some(completer) = parked.lock().take() {
        completer.complete(1);
    }
    owner.stop();
}

#[test]
fn test_dropped_completer_reports_abandoned() {
    let (owner, bridge) = owner("abandon-owner");
    let result: Result<String, _> = bridge.call_deferred(drop);
    assert!(matches!(result, Err(BridgeError::Abandoned)));
    owner.stop();
}

#[test]
fn test_teardown_drops_queued_work_and_abandons_waiters() {
    let queue = TaskQueue::bind_current();
    let flag = CompletionFlag::<u32>::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let completer = flag.completer();
    queue.post(move || completer.complete(1));
    for _ in 0..2 {
        let ran = ran.clone();
        queue.post(move || {
            ran.fetch_add(1, Ordering::Relaxed);
        });
    }

    queue.close();
    assert_eq!(queue.drain().unwrap(), 0);
    assert_eq!(ran.load(Ordering::Relaxed), 0);
    assert_eq!(queue.stats().snapshot().dropped, 3);
    assert_eq!(flag.state(), FlagState::Abandoned);
    assert!(matches!(flag.wait(None), Err(BridgeError::Abandoned)));

    // Posting after teardown is dropped too
    queue.post(|| {});
    assert_eq!(queue.stats().snapshot().dropped, 4);
}

#[tokio::test]
async fn test_async_call_from_runtime() {
    let (owner, bridge) = owner("async-owner");
    let name = bridge
        .call(|| std::thread::current().name().map(str::to_string))
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("async-owner"));
    owner.stop();
}
