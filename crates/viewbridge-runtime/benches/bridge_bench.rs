//! Benchmarks for the owner-thread bridge and the handle table
//!
//! Run with: cargo bench -p viewbridge-runtime

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use viewbridge_runtime::prelude::*;
use viewbridge_runtime::{Bridge, Category, HandleTable, OwnerThread, TaskQueue};

fn queue_benchmarks(c: &mut Criterion) {
    let queue = TaskQueue::bind_current();
    c.bench_function("post_and_drain_100", |b| {
        b.iter(|| {
            for i in 0..100u32 {
                queue.post(move || {
                    black_box(i);
                });
            }
            black_box(queue.drain().ok());
        })
    });
}

fn bridge_benchmarks(c: &mut Criterion) {
    let Ok(owner) = OwnerThread::spawn("bench-owner") else {
        return;
    };
    let bridge = Bridge::new(owner.queue().clone(), Some(Duration::from_secs(5)));

    c.bench_function("call_and_wait_round_trip", |b| {
        b.iter(|| black_box(bridge.call_and_wait(|| 7u64).ok()))
    });

    // Owner-thread calls run inline
    c.bench_function("nested_call_on_owner", |b| {
        let inner = bridge.clone();
        b.iter(|| {
            let inner = inner.clone();
            black_box(bridge.call_and_wait(move || inner.call_and_wait(|| 1u8).ok()).ok())
        })
    });

    owner.stop();
}

fn handle_benchmarks(c: &mut Criterion) {
    let Ok(environment) = Environment::builder().headless().thread_name("bench-env").spawn() else {
        return;
    };
    let Ok(browser) = environment.create_browser(BrowserOptions::default(), Arc::new(IgnoreEvents)) else {
        return;
    };
    let handles = HandleTable::new();
    // Keeps the browser exported so the loop never releases the last reference
    let anchor = handles.export(browser.clone());

    c.bench_function("export_and_release", |b| {
        b.iter(|| {
            let id = handles.export(browser.clone());
            black_box(handles.release(id, Category::Browser).ok())
        })
    });

    c.bench_function("resolve_handle", |b| {
        b.iter(|| black_box(handles.get::<Browser>(anchor).ok()))
    });

    let _ = environment.shutdown();
}

criterion_group!(benches, queue_benchmarks, bridge_benchmarks, handle_benchmarks);
criterion_main!(benches);
