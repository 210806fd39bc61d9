//! C FFI surface for the threading runtime.
//!
//! All functions use the `strand_` prefix. Thread procedures and
//! [`strand_thread_exit`] use the `C-unwind` ABI because exit is an unwind
//! that has to travel through the host's thread procedure back to the
//! trampoline.

use std::ffi::{CStr, c_char, c_void};

use super::handle::{self, ThreadHandle, ThreadOptions};
use super::lock::RecursiveLock;

/// Host thread procedure: called once with the opaque parameter.
pub type ThreadProc = extern "C-unwind" fn(param: *mut c_void);

/// Opaque host parameter carried to the new thread.
struct HostParam(*mut c_void);

// SAFETY: the host that passes the parameter is responsible for making it
// usable from the new thread.
unsafe impl Send for HostParam {}

impl HostParam {
    fn into_raw(self) -> *mut c_void {
        self.0
    }
}

// ===========================================================================
// Thread management
// ===========================================================================

/// Create a thread running `proc_(param)`.
///
/// If `out_handle` is null the thread runs in self-destruct mode and frees
/// itself when done. Otherwise `*out_handle` receives a handle which must be
/// released with `strand_thread_release`.
///
/// Returns `false` if the native thread could not be created; `*out_handle`
/// is left untouched in that case.
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string. `out_handle` must be
/// null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_thread_create(
    proc_: Option<ThreadProc>,
    param: *mut c_void,
    out_handle: *mut *mut ThreadHandle,
    name: *const c_char,
) -> bool {
    let Some(proc_) = proc_ else {
        tracing::warn!("strand_thread_create: null thread procedure");
        return false;
    };

    let mut options = ThreadOptions::new();
    if !name.is_null() {
        let name = unsafe { CStr::from_ptr(name) };
        options = options.name(name.to_string_lossy());
    }

    let param = HostParam(param);
    let body = move || proc_(param.into_raw());

    if out_handle.is_null() {
        match ThreadHandle::spawn_detached(options, body) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(%err, "strand_thread_create failed");
                false
            }
        }
    } else {
        match ThreadHandle::spawn(options, body) {
            Ok(thread) => {
                unsafe { *out_handle = Box::into_raw(Box::new(thread)) };
                true
            }
            Err(err) => {
                tracing::error!(%err, "strand_thread_create failed");
                false
            }
        }
    }
}

/// Block until the thread has finished. The handle stays valid.
///
/// # Safety
/// `ptr` must be a handle returned by `strand_thread_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_thread_join(ptr: *mut ThreadHandle) {
    if ptr.is_null() {
        tracing::warn!("strand_thread_join: null pointer");
        return;
    }
    let thread = unsafe { &mut *ptr };
    thread.join();
}

/// Free a thread handle, joining the thread first if it was not joined.
///
/// # Safety
/// `ptr` must be a handle returned by `strand_thread_create`, not yet released.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_thread_release(ptr: *mut ThreadHandle) {
    if ptr.is_null() {
        tracing::warn!("strand_thread_release: null pointer");
        return;
    }
    drop(unsafe { Box::from_raw(ptr) });
}

/// Terminate the calling thread. Must be called from a thread procedure
/// started by `strand_thread_create`.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn strand_thread_exit() -> ! {
    handle::exit()
}

// ===========================================================================
// Lock operations
// ===========================================================================

/// Create a recursive lock. Free it with `strand_lock_destroy`.
#[unsafe(no_mangle)]
pub extern "C" fn strand_lock_new() -> *mut RecursiveLock {
    Box::into_raw(Box::new(RecursiveLock::new()))
}

/// # Safety
/// `ptr` must be a lock returned by `strand_lock_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_lock_acquire(ptr: *mut RecursiveLock, allow_recursive: bool) {
    if ptr.is_null() {
        tracing::warn!("strand_lock_acquire: null pointer");
        return;
    }
    unsafe { &*ptr }.acquire(allow_recursive);
}

/// # Safety
/// `ptr` must be a lock returned by `strand_lock_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_lock_release(ptr: *mut RecursiveLock, allow_recursive: bool) {
    if ptr.is_null() {
        tracing::warn!("strand_lock_release: null pointer");
        return;
    }
    unsafe { &*ptr }.release(allow_recursive);
}

/// # Safety
/// `ptr` must be a lock returned by `strand_lock_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_lock_wait(ptr: *mut RecursiveLock) {
    if ptr.is_null() {
        tracing::warn!("strand_lock_wait: null pointer");
        return;
    }
    unsafe { &*ptr }.wait_for_signal();
}

/// # Safety
/// `ptr` must be a lock returned by `strand_lock_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_lock_signal(ptr: *mut RecursiveLock) {
    if ptr.is_null() {
        tracing::warn!("strand_lock_signal: null pointer");
        return;
    }
    unsafe { &*ptr }.send_signal();
}

/// Returns `true` if the calling thread holds the lock; `false` otherwise or
/// on null input.
///
/// # Safety
/// `ptr` must be a lock returned by `strand_lock_new`, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_lock_is_owned(ptr: *mut RecursiveLock) -> bool {
    if ptr.is_null() {
        return false;
    }
    unsafe { &*ptr }.is_owned_by_calling_thread()
}

/// Destroy a lock. No thread may hold or wait on it.
///
/// # Safety
/// `ptr` must be a lock returned by `strand_lock_new`, not yet destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn strand_lock_destroy(ptr: *mut RecursiveLock) {
    if ptr.is_null() {
        tracing::warn!("strand_lock_destroy: null pointer");
        return;
    }
    drop(unsafe { Box::from_raw(ptr) });
}
