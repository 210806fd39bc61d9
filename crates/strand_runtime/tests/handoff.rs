//! Integration tests for threads coordinating through a recursive lock.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
    mpsc,
};
use std::time::Duration;

use strand_runtime::{RecursiveLock, RunState, ThreadHandle, ThreadOptions};

struct Shared {
    lock: RecursiveLock,
    counter: AtomicU32,
    signalled: AtomicBool,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: RecursiveLock::new(),
            counter: AtomicU32::new(0),
            signalled: AtomicBool::new(false),
        })
    }
}

/// Worker A takes the lock, bumps the counter to 1, waits for a signal, then
/// bumps it to 2. The main thread plays B: it waits to see 1, signals, and
/// joins A.
#[test]
fn test_handoff_through_wait_and_signal() {
    let shared = Shared::new();

    let worker_shared = shared.clone();
    let mut worker = ThreadHandle::spawn(ThreadOptions::named("handoff-a"), move || {
        let shared = worker_shared;
        shared.lock.acquire(false);
        shared.counter.store(1, Ordering::Relaxed);
        shared.lock.wait_while(|| !shared.signalled.load(Ordering::Relaxed));
        shared.counter.store(2, Ordering::Relaxed);
        shared.lock.release(false);
    })
    .unwrap();

    loop {
        shared.lock.acquire(false);
        if shared.counter.load(Ordering::Relaxed) == 1 {
            break;
        }
        shared.lock.release(false);
        std::thread::yield_now();
    }
    shared.signalled.store(true, Ordering::Relaxed);
    shared.lock.send_signal();
    shared.lock.release(false);

    worker.join();
    assert_eq!(shared.counter.load(Ordering::Relaxed), 2);
    assert_eq!(worker.state(), RunState::Returned);
}

#[test]
fn test_join_makes_final_writes_visible() {
    let value = Arc::new(AtomicU32::new(0));
    let writer = value.clone();
    let mut handle = ThreadHandle::spawn(ThreadOptions::named("writer"), move || {
        writer.store(0xfeed, Ordering::Relaxed);
    })
    .unwrap();

    handle.join();
    assert_eq!(value.load(Ordering::Relaxed), 0xfeed);
}

#[test]
fn test_exit_after_releasing_lock_leaves_it_free() {
    let shared = Shared::new();
    let worker_shared = shared.clone();

    let mut handle = ThreadHandle::spawn(ThreadOptions::named("early-exit"), move || {
        let guard = worker_shared.lock.lock();
        worker_shared.counter.store(7, Ordering::Relaxed);
        drop(guard);
        strand_runtime::thread::exit();
    })
    .unwrap();

    handle.join();
    assert_eq!(handle.state(), RunState::Exited);
    assert_eq!(shared.counter.load(Ordering::Relaxed), 7);
    assert_eq!(shared.lock.owner(), None);
}

#[test]
fn test_guard_unwinds_with_exit() {
    let shared = Shared::new();
    let worker_shared = shared.clone();

    let mut handle = ThreadHandle::spawn(ThreadOptions::named("exit-under-lock"), move || {
        let _guard = worker_shared.lock.lock();
        strand_runtime::thread::exit();
    })
    .unwrap();

    handle.join();
    // The guard was dropped during the exit unwind, so the lock is free again.
    let guard = shared.lock.lock();
    assert_eq!(guard.depth(), 1);
}

#[test]
fn test_self_destructing_thread_needs_no_caller_action() {
    let (tx, rx) = mpsc::channel();
    ThreadHandle::spawn_detached(ThreadOptions::named("fire-and-forget"), move || {
        tx.send(strand_runtime::thread::current_name()).unwrap();
    })
    .unwrap();

    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("fire-and-forget"));
}

#[test]
fn test_many_waiters_all_wake_eventually() {
    const WAITERS: u32 = 4;

    let shared = Shared::new();
    let parked = Arc::new(AtomicU32::new(0));

    let mut handles: Vec<_> = (0..WAITERS)
        .map(|i| {
            let shared = shared.clone();
            let parked = parked.clone();
            ThreadHandle::spawn(ThreadOptions::named(format!("waiter-{i}")), move || {
                let guard = shared.lock.lock();
                parked.fetch_add(1, Ordering::Relaxed);
                guard.wait_while(|| !shared.signalled.load(Ordering::Relaxed));
                shared.counter.fetch_add(1, Ordering::Relaxed);
                guard.send_signal();
            })
            .unwrap()
        })
        .collect();

    loop {
        let guard = shared.lock.lock();
        if parked.load(Ordering::Relaxed) == WAITERS {
            shared.signalled.store(true, Ordering::Relaxed);
            guard.send_signal();
            break;
        }
        drop(guard);
        std::thread::yield_now();
    }

    for handle in &mut handles {
        handle.join();
    }
    assert_eq!(shared.counter.load(Ordering::Relaxed), WAITERS);
}
