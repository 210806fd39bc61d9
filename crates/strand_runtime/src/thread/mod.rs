//! Thread lifecycle and locking primitives.
//!
//! ## Modules
//!
//! - [`handle`]: Thread handle with cooperative exit, join, and self-destruct mode
//! - [`lock`]: Recursive lock with wait/signal on top of a non-recursive mutex
//! - [`id`]: Portable thread identity
//! - [`ffi`]: C FFI surface for hosts using function-pointer threads

// ---------------------------------------------------------------------------
// Conditional trace logging
// ---------------------------------------------------------------------------

macro_rules! thread_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "thread-debug")]
        tracing::trace!($($arg)*);
    };
}

/// Log and panic on a caller bug. Never returns.
macro_rules! contract_violation {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!(%message, "thread contract violation");
        panic!("thread contract violation: {message}")
    }};
}

pub mod ffi;
pub mod handle;
pub mod id;
pub mod lock;

pub use handle::{RunState, ThreadHandle, ThreadOptions, current_name, exit};
pub use id::ThreadId;
pub use lock::{RecursiveLock, RecursiveLockGuard};
