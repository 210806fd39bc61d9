//! Runtime threading layer for strand.
//!
//! This crate provides:
//! - Thread handles with cooperative exit and join
//! - A recursive lock layered on a non-recursive mutex, with condition signaling
//! - A C FFI surface for hosts that drive threads through function pointers

pub mod error;
pub mod thread;

pub use error::{ThreadError, ThreadResult};
pub use thread::{
    RecursiveLock, RecursiveLockGuard, RunState, ThreadHandle, ThreadId, ThreadOptions,
};
