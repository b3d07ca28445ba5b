use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use shardpool::{SubmitErrorKind, WorkerPool};

const LIFETIME: Duration = Duration::from_millis(100);

fn counting_pool(shards: usize) -> (WorkerPool<u32>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);

    let pool = WorkerPool::builder()
        .shards(shards)
        .idle_lifetime(LIFETIME)
        .build(move |_: u32| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

    (pool, count)
}

/// Poll until `condition` holds or `timeout` passes.
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if condition() {
            return true;
        }

        thread::sleep(Duration::from_millis(5));
    }

    condition()
}

#[test]
fn submit_before_start_fails() {
    let (pool, count) = counting_pool(1);

    let error = pool.submit(7).unwrap_err();
    assert_eq!(error.kind(), SubmitErrorKind::NotStarted);
    assert_eq!(error.into_task(), 7);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn single_submission() {
    let (pool, count) = counting_pool(1);

    pool.start();
    pool.submit(1).unwrap();

    assert!(pool.spawned_count() >= 1);
    assert!(wait_until(Duration::from_secs(1), || {
        count.load(Ordering::SeqCst) == 1
    }));

    // The lone worker sits idle past its lifetime and gets reaped.
    assert!(wait_until(Duration::from_secs(2), || {
        pool.spawned_count() == 0
    }));
}

#[test]
fn start_is_idempotent() {
    let (pool, count) = counting_pool(1);

    pool.start();
    pool.start();

    pool.submit(1).unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        count.load(Ordering::SeqCst) == 1
    }));
}

#[test]
fn stop_is_idempotent_and_rejects_submissions() {
    let (pool, _count) = counting_pool(1);

    pool.start();
    pool.stop();
    pool.stop();

    let error = pool.submit(1).unwrap_err();
    assert_eq!(error.kind(), SubmitErrorKind::Stopped);
}

#[test]
fn stop_before_start_is_a_noop() {
    let (pool, _count) = counting_pool(1);

    pool.stop();

    // The pool was never started, so submission still reports that.
    let error = pool.submit(1).unwrap_err();
    assert_eq!(error.kind(), SubmitErrorKind::NotStarted);
}

#[test]
fn burst_then_quiesce() {
    let (pool, count) = counting_pool(8);

    pool.start();

    let pool = Arc::new(pool);
    let mut handles = Vec::new();

    for _ in 0..8 {
        let pool = Arc::clone(&pool);

        handles.push(thread::spawn(move || {
            for n in 0..125 {
                pool.submit(n).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || {
        count.load(Ordering::SeqCst) == 1000
    }));

    // Idle workers drain once nothing is submitted for the lifetime.
    assert!(wait_until(Duration::from_secs(3), || {
        pool.spawned_count() == 0
    }));
}

#[test]
fn workers_are_recycled_across_tasks() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);

    let pool = WorkerPool::builder()
        .shards(1)
        .idle_lifetime(Duration::from_secs(10))
        .build(move |_: u32| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

    pool.start();

    pool.submit(1).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        count.load(Ordering::SeqCst) == 1
    }));

    // Give the worker a moment to park itself back in an idle slot.
    thread::sleep(Duration::from_millis(50));

    pool.submit(2).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        count.load(Ordering::SeqCst) == 2
    }));

    assert_eq!(pool.spawned_count(), 1);
    assert_eq!(pool.completed_tasks(), 2);
}

#[test]
fn sustained_load_keeps_a_worker_alive() {
    let (pool, count) = counting_pool(1);

    pool.start();

    for n in 0..10 {
        pool.submit(n).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(pool.spawned_count() >= 1);
    }

    assert!(wait_until(Duration::from_secs(1), || {
        count.load(Ordering::SeqCst) == 10
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        pool.spawned_count() == 0
    }));
}

#[test]
fn stop_drains_running_tasks() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);

    let pool = WorkerPool::builder()
        .shards(4)
        .idle_lifetime(LIFETIME)
        .build(move |_: u32| {
            thread::sleep(Duration::from_millis(10));
            seen.fetch_add(1, Ordering::SeqCst);
        });

    pool.start();

    for n in 0..100 {
        pool.submit(n).unwrap();
    }

    pool.stop();

    // Everything handed over before the stop still runs to completion.
    assert!(wait_until(Duration::from_secs(5), || {
        count.load(Ordering::SeqCst) == 100
    }));

    let error = pool.submit(100).unwrap_err();
    assert_eq!(error.kind(), SubmitErrorKind::Stopped);
    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn shard_count_is_clamped() {
    let (pool, _count) = counting_pool(1);
    assert_eq!(pool.shards(), 1);

    pool.set_shards(0);
    assert_eq!(pool.shards(), 1);

    pool.set_shards(10_000);
    assert_eq!(pool.shards(), 128);

    let big = WorkerPool::builder().shards(10_000).build(|_: u32| {});
    assert_eq!(big.shards(), 128);
}

#[test]
fn set_shards_after_start_is_ignored() {
    let (pool, _count) = counting_pool(1);

    pool.set_shards(4);
    pool.start();
    pool.set_shards(64);

    assert_eq!(pool.shards(), 4);
}

#[test]
#[should_panic(expected = "idle worker lifetime must be non-zero")]
fn zero_idle_lifetime_panics() {
    WorkerPool::builder()
        .idle_lifetime(Duration::ZERO)
        .build(|_: u32| {});
}

#[test]
#[should_panic(expected = "worker pool name must not contain null bytes")]
fn name_with_null_bytes_panics() {
    WorkerPool::builder().name("uh\0oh").build(|_: u32| {});
}

#[test]
fn panicking_handler_retires_its_worker() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);

    let pool = WorkerPool::builder()
        .shards(1)
        .idle_lifetime(Duration::from_secs(10))
        .name("poison")
        .build(move |n: u32| {
            if n == 0 {
                panic!("poisoned task");
            }

            seen.fetch_add(1, Ordering::SeqCst);
        });

    pool.start();

    pool.submit(0).unwrap();

    // The unwinding worker must still decrement the live count.
    assert!(wait_until(Duration::from_secs(1), || {
        pool.spawned_count() == 0
    }));

    // The pool stays usable afterwards.
    pool.submit(1).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        count.load(Ordering::SeqCst) == 1
    }));
}

#[test]
fn dropping_the_pool_stops_it() {
    let (pool, count) = counting_pool(2);

    pool.start();
    pool.submit(1).unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        count.load(Ordering::SeqCst) == 1
    }));

    drop(pool);
}
