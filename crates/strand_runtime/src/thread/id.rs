//! Portable thread identity.

use std::{
    cell::Cell,
    fmt,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::error::{ThreadError, ThreadResult};

/// Global thread ID counter. Zero is never handed out.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_ID: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// Identity of a thread, compared by value.
///
/// Threads started through [`ThreadHandle`](super::ThreadHandle) get their
/// identity before they begin running; any other thread is assigned one the
/// first time it asks for [`ThreadId::current`]. Identities are never reused
/// within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    /// The identity of the calling thread.
    pub fn current() -> ThreadId {
        CURRENT_ID.with(|current| match current.get() {
            Some(id) => id,
            None => {
                let id = Self::allocate().unwrap_or_else(|err| {
                    tracing::error!(%err, "cannot assign an identity to the calling thread");
                    std::process::abort()
                });
                current.set(Some(id));
                id
            }
        })
    }

    /// Reserve a fresh identity.
    pub(crate) fn allocate() -> ThreadResult<ThreadId> {
        let raw = NEXT_ID
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(1)
            })
            .map_err(|_| ThreadError::IdExhausted)?;
        NonZeroU64::new(raw).map(ThreadId).ok_or(ThreadError::IdExhausted)
    }

    /// Bind `self` as the identity of the calling thread.
    ///
    /// Only called first thing on a freshly spawned thread.
    pub(crate) fn install(self) {
        CURRENT_ID.with(|current| current.set(Some(self)));
    }

    pub(crate) fn from_raw(raw: u64) -> Option<ThreadId> {
        NonZeroU64::new(raw).map(ThreadId)
    }

    /// The numeric value of this identity. Never zero.
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
