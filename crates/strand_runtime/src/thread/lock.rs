//! Recursive lock with owner tracking and condition signaling.
//!
//! The lock is layered on a non-recursive native mutex. Recursion is pure
//! bookkeeping: an owner identity plus a depth counter. Both fields are only
//! written by the thread that holds the native mutex, so they need no lock of
//! their own. The only cross-thread read is the ownership query, which compares
//! the owner against the reader's own identity; that comparison can only be
//! true if the reader wrote the value itself.

use std::{
    fmt,
    marker::PhantomData,
    mem,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use parking_lot::{Condvar, Mutex};

use super::id::ThreadId;

/// Encoding of "no owner" in the `owner` word. Thread identities are never zero.
const UNOWNED: u64 = 0;

// ---------------------------------------------------------------------------
// RecursiveLock
// ---------------------------------------------------------------------------

/// A recursive mutual-exclusion lock with condition-variable signaling.
///
/// Acquire and release are explicit calls rather than scoped guards, so a lock
/// can be taken in one function and released in another. Use
/// [`RecursiveLock::lock`] for the scoped form.
///
/// The `allow_recursive` flag on [`acquire`](Self::acquire) and
/// [`release`](Self::release) is an assertion by the caller: passing `false`
/// states that this acquisition is not nested, and the lock panics if that is
/// not true.
pub struct RecursiveLock {
    mutex: Mutex<()>,
    condition: Condvar,
    owner: AtomicU64,
    depth: AtomicU32,
}

impl RecursiveLock {
    pub const fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condition: Condvar::new(),
            owner: AtomicU64::new(UNOWNED),
            depth: AtomicU32::new(0),
        }
    }

    /// Whether the calling thread currently holds the lock.
    pub fn is_owned_by_calling_thread(&self) -> bool {
        self.is_owned_by(ThreadId::current())
    }

    /// The thread currently holding the lock, if any.
    ///
    /// For threads other than the owner this is a snapshot that may be stale
    /// by the time it is read.
    pub fn owner(&self) -> Option<ThreadId> {
        ThreadId::from_raw(self.owner.load(Ordering::Relaxed))
    }

    /// Recursion depth as seen by the calling thread: the number of unmatched
    /// acquisitions if it owns the lock, zero otherwise.
    pub fn depth(&self) -> u32 {
        if self.is_owned_by_calling_thread() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Take the lock, blocking until it is available.
    ///
    /// If the calling thread already owns the lock, the depth is incremented
    /// without touching the native mutex. Re-entering with
    /// `allow_recursive == false` is a contract violation.
    pub fn acquire(&self, allow_recursive: bool) {
        let me = ThreadId::current();

        if self.is_owned_by(me) {
            if !allow_recursive {
                contract_violation!("thread {me} re-entered a lock it acquired as non-recursive");
            }
        } else {
            mem::forget(self.mutex.lock());

            let depth = self.depth.load(Ordering::Relaxed);
            if depth != 0 {
                contract_violation!("native mutex was free while the lock recorded depth {depth}");
            }
            self.owner.store(me.as_u64(), Ordering::Relaxed);
        }

        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Give back one level of the lock.
    ///
    /// The native mutex is released when the depth reaches zero. With
    /// `allow_recursive == false` the caller asserts it holds exactly one level.
    pub fn release(&self, allow_recursive: bool) {
        let me = ThreadId::current();
        if !self.is_owned_by(me) {
            contract_violation!("thread {me} released a lock it does not own");
        }

        let depth = self.depth.load(Ordering::Relaxed);
        if !allow_recursive && depth != 1 {
            contract_violation!("thread {me} released a non-recursive lock held at depth {depth}");
        }

        let depth = depth - 1;
        self.depth.store(depth, Ordering::Relaxed);
        if depth != 0 {
            return;
        }

        self.owner.store(UNOWNED, Ordering::Relaxed);
        // SAFETY: `acquire` locked the native mutex on this thread and forgot
        // the guard; ownership was checked above.
        unsafe { self.mutex.force_unlock() };
    }

    /// Release every level of the lock, block until signaled, then take it
    /// back at the same depth.
    ///
    /// Wakeups may be spurious; re-check the waited-for condition afterwards,
    /// or use [`wait_while`](Self::wait_while).
    pub fn wait_for_signal(&self) {
        let me = ThreadId::current();
        if !self.is_owned_by(me) {
            contract_violation!("thread {me} waited on a lock it does not own");
        }

        let saved_depth = self.depth.swap(0, Ordering::Relaxed);
        self.owner.store(UNOWNED, Ordering::Relaxed);

        // SAFETY: the ownership check above proves this thread holds the
        // native mutex. The guard is forgotten again after the wait so the
        // mutex stays locked on return.
        let mut guard = unsafe { self.mutex.make_guard_unchecked() };
        self.condition.wait(&mut guard);
        mem::forget(guard);

        self.owner.store(me.as_u64(), Ordering::Relaxed);
        self.depth.store(saved_depth, Ordering::Relaxed);
    }

    /// Wait for signals for as long as `condition` holds.
    pub fn wait_while<F>(&self, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        while condition() {
            self.wait_for_signal();
        }
    }

    /// Wake one thread blocked in [`wait_for_signal`](Self::wait_for_signal).
    /// Does nothing if no thread is waiting.
    pub fn send_signal(&self) {
        let woke = self.condition.notify_one();
        if !woke {
            tracing::trace!("signal sent with no waiters");
        }
    }

    /// Acquire the lock (recursively) for the lifetime of the returned guard.
    pub fn lock(&self) -> RecursiveLockGuard<'_> {
        self.acquire(true);
        RecursiveLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    fn is_owned_by(&self, thread: ThreadId) -> bool {
        self.owner.load(Ordering::Relaxed) == thread.as_u64()
    }
}

impl Default for RecursiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecursiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveLock")
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

impl Drop for RecursiveLock {
    fn drop(&mut self) {
        let depth = *self.depth.get_mut();
        if depth != 0 {
            tracing::warn!(
                owner = ?ThreadId::from_raw(*self.owner.get_mut()),
                depth,
                "recursive lock destroyed while held"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// RecursiveLockGuard
// ---------------------------------------------------------------------------

/// Scoped hold on a [`RecursiveLock`]; releases one level on drop.
///
/// Guards nest: taking a second guard on the same thread deepens the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RecursiveLockGuard<'a> {
    lock: &'a RecursiveLock,
    // Release must happen on the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl RecursiveLockGuard<'_> {
    pub fn wait_for_signal(&self) {
        self.lock.wait_for_signal();
    }

    pub fn wait_while<F>(&self, condition: F)
    where
        F: FnMut() -> bool,
    {
        self.lock.wait_while(condition);
    }

    pub fn send_signal(&self) {
        self.lock.send_signal();
    }

    pub fn depth(&self) -> u32 {
        self.lock.depth()
    }
}

impl Drop for RecursiveLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32},
        mpsc,
    };
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_new_lock_is_unheld() {
        let lock = RecursiveLock::new();
        assert_eq!(lock.owner(), None);
        assert_eq!(lock.depth(), 0);
        assert!(!lock.is_owned_by_calling_thread());
    }

    #[test]
    fn test_acquire_release_single() {
        let lock = RecursiveLock::new();
        lock.acquire(false);
        assert!(lock.is_owned_by_calling_thread());
        assert_eq!(lock.owner(), Some(ThreadId::current()));
        assert_eq!(lock.depth(), 1);

        lock.release(false);
        assert_eq!(lock.owner(), None);
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_recursive_acquire_counts_depth() {
        let lock = RecursiveLock::new();
        for expected in 1..=5 {
            lock.acquire(true);
            assert_eq!(lock.depth(), expected);
        }
        for expected in (0..5).rev() {
            lock.release(true);
            assert_eq!(lock.depth(), expected);
        }
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn test_lock_is_reusable() {
        let lock = RecursiveLock::new();
        for _ in 0..3 {
            lock.acquire(false);
            lock.release(false);
        }
        assert_eq!(lock.owner(), None);
    }

    #[test]
    #[should_panic(expected = "non-recursive")]
    fn test_reentering_non_recursive_panics() {
        let lock = RecursiveLock::new();
        lock.acquire(false);
        lock.acquire(false);
    }

    #[test]
    #[should_panic(expected = "does not own")]
    fn test_release_without_owning_panics() {
        let lock = RecursiveLock::new();
        lock.release(true);
    }

    #[test]
    #[should_panic(expected = "held at depth 2")]
    fn test_non_recursive_release_of_nested_lock_panics() {
        let lock = RecursiveLock::new();
        lock.acquire(true);
        lock.acquire(true);
        lock.release(false);
    }

    #[test]
    #[should_panic(expected = "does not own")]
    fn test_wait_without_owning_panics() {
        let lock = RecursiveLock::new();
        lock.wait_for_signal();
    }

    #[test]
    fn test_release_from_other_thread_is_rejected() {
        let lock = Arc::new(RecursiveLock::new());
        lock.acquire(false);

        let other = lock.clone();
        let result = thread::spawn(move || other.release(false)).join();
        assert!(result.is_err());

        assert!(lock.is_owned_by_calling_thread());
        lock.release(false);
    }

    #[test]
    fn test_second_thread_blocks_until_depth_returns_to_zero() {
        let lock = Arc::new(RecursiveLock::new());
        let entered = Arc::new(AtomicBool::new(false));

        lock.acquire(true);
        lock.acquire(true);

        let contender = {
            let lock = lock.clone();
            let entered = entered.clone();
            thread::spawn(move || {
                lock.acquire(false);
                entered.store(true, Ordering::SeqCst);
                lock.release(false);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        lock.release(true);
        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst), "one level still held");

        lock.release(true);
        contender.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_send_signal_without_waiters_is_noop() {
        let lock = RecursiveLock::new();
        lock.send_signal();
        lock.acquire(false);
        lock.send_signal();
        assert_eq!(lock.depth(), 1);
        lock.release(false);
    }

    #[test]
    fn test_wait_restores_depth_and_frees_lock_meanwhile() {
        let lock = Arc::new(RecursiveLock::new());
        let holding = Arc::new(AtomicBool::new(false));
        let ready = Arc::new(AtomicBool::new(false));
        let (depth_tx, depth_rx) = mpsc::channel();

        let waiter = {
            let lock = lock.clone();
            let holding = holding.clone();
            let ready = ready.clone();
            thread::spawn(move || {
                lock.acquire(true);
                lock.acquire(true);
                lock.acquire(true);
                holding.store(true, Ordering::SeqCst);
                lock.wait_while(|| !ready.load(Ordering::SeqCst));
                depth_tx.send(lock.depth()).unwrap();
                for _ in 0..3 {
                    lock.release(true);
                }
            })
        };

        // The waiter holds the lock from its first acquire until it parks, so
        // winning the lock after `holding` is set means the waiter is parked.
        loop {
            lock.acquire(false);
            if holding.load(Ordering::SeqCst) {
                break;
            }
            lock.release(false);
            thread::yield_now();
        }
        assert_eq!(lock.depth(), 1);
        ready.store(true, Ordering::SeqCst);
        lock.send_signal();
        lock.release(false);

        assert_eq!(depth_rx.recv().unwrap(), 3);
        waiter.join().unwrap();
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn test_counter_is_consistent_under_contention() {
        const THREADS: u32 = 8;
        const ITERATIONS: u32 = 500;

        let lock = Arc::new(RecursiveLock::new());
        let counter = Arc::new(AtomicU32::new(0));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = lock.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        let _outer = lock.lock();
                        let _inner = lock.lock();
                        let value = counter.load(Ordering::Relaxed);
                        thread::yield_now();
                        counter.store(value + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), THREADS * ITERATIONS);
    }

    #[test]
    fn test_guards_nest_and_release_on_drop() {
        let lock = RecursiveLock::new();
        {
            let outer = lock.lock();
            assert_eq!(outer.depth(), 1);
            {
                let inner = lock.lock();
                assert_eq!(inner.depth(), 2);
            }
            assert_eq!(outer.depth(), 1);
        }
        assert_eq!(lock.owner(), None);
    }
}
