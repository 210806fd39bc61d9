//! Thread handle with cooperative exit, join, and self-destruct mode.

use std::{
    any::Any,
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    process,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread,
};

use super::id::ThreadId;
use crate::error::{ThreadError, ThreadResult};

// ---------------------------------------------------------------------------
// Per-thread state
// ---------------------------------------------------------------------------

thread_local! {
    /// The thread object of the running thread, if it was started by this module.
    static CURRENT: RefCell<Option<Arc<ThreadInner>>> = const { RefCell::new(None) };
}

/// Unwind payload raised by [`exit`] and caught by the trampoline.
struct ExitSignal;

// ---------------------------------------------------------------------------
// ThreadOptions
// ---------------------------------------------------------------------------

/// Creation options for a thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadOptions {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with a display name. Names are diagnostic only.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().name(name)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes for the native thread. Defaults to the platform's.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// How far a thread has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// The thread function has not concluded yet.
    Running = 0,
    /// The thread function returned normally.
    Returned = 1,
    /// The thread function was cut short by [`exit`].
    Exited = 2,
}

impl RunState {
    fn from_u8(raw: u8) -> RunState {
        match raw {
            1 => RunState::Returned,
            2 => RunState::Exited,
            _ => RunState::Running,
        }
    }
}

// ---------------------------------------------------------------------------
// ThreadInner
// ---------------------------------------------------------------------------

/// The thread object shared between a handle and its running thread.
///
/// In self-destruct mode the trampoline holds the only reference, so the
/// object is freed on the thread itself once the function concludes.
#[derive(Debug)]
struct ThreadInner {
    id: ThreadId,
    name: String,
    state: AtomicU8,
}

impl ThreadInner {
    fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn finish(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Drop for ThreadInner {
    fn drop(&mut self) {
        thread_trace!(thread = %self.name, thread_id = %self.id, "thread object freed");
    }
}

// ---------------------------------------------------------------------------
// ThreadHandle
// ---------------------------------------------------------------------------

/// Owned handle to a running (or finished) thread.
///
/// The handle stays valid for inspection after the thread finishes. Dropping a
/// handle that was never joined joins it.
#[derive(Debug)]
pub struct ThreadHandle {
    inner: Arc<ThreadInner>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl ThreadHandle {
    /// Start a thread running `func(arg)`.
    ///
    /// With `retain_handle` the caller gets a handle to join later. Without it
    /// the thread runs in self-destruct mode: no handle exists and the thread
    /// object frees itself when `func` concludes.
    pub fn create<F, A>(
        func: F,
        arg: A,
        retain_handle: bool,
        options: ThreadOptions,
    ) -> ThreadResult<Option<ThreadHandle>>
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        if retain_handle {
            Self::spawn(options, move || func(arg)).map(Some)
        } else {
            Self::spawn_detached(options, move || func(arg)).map(|()| None)
        }
    }

    /// Start a thread and keep a handle to it.
    pub fn spawn<F>(options: ThreadOptions, func: F) -> ThreadResult<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = thread_object(&options)?;
        let join_handle = launch(inner.clone(), options.stack_size, func)?;
        Ok(ThreadHandle {
            inner,
            join_handle: Some(join_handle),
        })
    }

    /// Start a thread in self-destruct mode.
    pub fn spawn_detached<F>(options: ThreadOptions, func: F) -> ThreadResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = thread_object(&options)?;
        // The running thread holds the only reference to the thread object,
        // and dropping the native join handle detaches it.
        launch(inner, options.stack_size, func).map(drop)
    }

    /// Terminate the calling thread, which must be the one this handle
    /// represents. See [`exit`].
    pub fn exit(&self) -> ! {
        if ThreadId::current() != self.inner.id {
            contract_violation!(
                "thread {} called exit on thread `{}`",
                ThreadId::current(),
                self.inner.name
            );
        }
        exit()
    }

    /// Block until the thread has finished, then release the native thread.
    ///
    /// Joining a handle that was already joined does nothing. Joining from
    /// the represented thread itself is a contract violation.
    pub fn join(&mut self) {
        if ThreadId::current() == self.inner.id {
            contract_violation!("thread `{}` tried to join itself", self.inner.name);
        }

        let Some(join_handle) = self.join_handle.take() else {
            tracing::debug!(
                thread = %self.inner.name,
                "join on a thread that is no longer running"
            );
            return;
        };

        thread_trace!(thread = %self.inner.name, thread_id = %self.inner.id, "joining thread");

        if join_handle.join().is_err() {
            // The trampoline aborts on any failure it does not expect, so
            // this only fires if the trampoline itself broke.
            tracing::error!(thread = %self.inner.name, "native thread ended in a panic");
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    /// Whether the native thread is still attached to this handle, i.e. it
    /// has not been joined yet.
    pub fn is_running(&self) -> bool {
        self.join_handle.is_some()
    }

    /// Whether the thread function has concluded.
    pub fn is_finished(&self) -> bool {
        self.inner.state() != RunState::Running
    }

    pub fn state(&self) -> RunState {
        self.inner.state()
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        let Some(join_handle) = self.join_handle.take() else {
            return;
        };

        if ThreadId::current() == self.inner.id {
            thread_trace!(thread = %self.inner.name, "handle dropped on its own thread, detaching");
            return;
        }

        thread_trace!(thread = %self.inner.name, "auto-joining unjoined thread on drop");
        if join_handle.join().is_err() {
            tracing::error!(thread = %self.inner.name, "native thread ended in a panic");
        }
    }
}

// ---------------------------------------------------------------------------
// Free functions for the running thread
// ---------------------------------------------------------------------------

/// Terminate the calling thread cooperatively.
///
/// The thread function unwinds from the call point: nothing after it runs,
/// but destructors of live values do. The thread then finishes as if the
/// function had returned, with [`RunState::Exited`].
///
/// Must be called from a thread started by [`ThreadHandle`]. The exit is an
/// unwind, so a `catch_unwind` between here and the thread function would
/// intercept it.
pub fn exit() -> ! {
    let managed = CURRENT.with(|current| current.borrow().as_ref().map(|inner| inner.id));
    match managed {
        Some(_id) => {
            thread_trace!(thread_id = %_id, "thread requested exit");
            panic::resume_unwind(Box::new(ExitSignal))
        }
        None => contract_violation!(
            "exit called on thread {} which was not started by ThreadHandle",
            ThreadId::current()
        ),
    }
}

/// Name of the calling thread, if it was started by [`ThreadHandle`].
pub fn current_name() -> Option<String> {
    CURRENT.with(|current| current.borrow().as_ref().map(|inner| inner.name.clone()))
}

// ---------------------------------------------------------------------------
// Launch and trampoline
// ---------------------------------------------------------------------------

/// Allocate the thread object for a thread about to be launched.
fn thread_object(options: &ThreadOptions) -> ThreadResult<Arc<ThreadInner>> {
    let id = ThreadId::allocate()?;
    let name = match &options.name {
        Some(name) => name.clone(),
        None => format!("strand-{id}"),
    };
    if name.contains('\0') {
        return Err(ThreadError::InvalidName(name));
    }

    Ok(Arc::new(ThreadInner {
        id,
        name,
        state: AtomicU8::new(RunState::Running as u8),
    }))
}

/// Start the native thread. `inner` moves into the new thread, so whatever
/// the caller does not keep is freed there.
fn launch<F>(
    inner: Arc<ThreadInner>,
    stack_size: Option<usize>,
    func: F,
) -> ThreadResult<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread_trace!(thread = %inner.name, thread_id = %inner.id, "creating thread");

    let name = inner.name.clone();
    let mut builder = thread::Builder::new().name(name.clone());
    if let Some(bytes) = stack_size {
        builder = builder.stack_size(bytes);
    }

    builder
        .spawn(move || trampoline(inner, func))
        .map_err(|source| {
            tracing::error!(thread = %name, error = %source, "failed to create native thread");
            ThreadError::Spawn { name, source }
        })
}

/// Entry point of every thread started by this module.
fn trampoline<F>(inner: Arc<ThreadInner>, func: F)
where
    F: FnOnce(),
{
    inner.id.install();
    CURRENT.with(|current| *current.borrow_mut() = Some(inner.clone()));

    thread_trace!(thread = %inner.name, thread_id = %inner.id, "starting thread");

    let state = match panic::catch_unwind(AssertUnwindSafe(func)) {
        Ok(()) => RunState::Returned,
        Err(payload) if payload.is::<ExitSignal>() => RunState::Exited,
        Err(payload) => {
            tracing::error!(
                thread = %inner.name,
                thread_id = %inner.id,
                panic = panic_message(payload.as_ref()),
                "unexpected failure escaped thread function, aborting"
            );
            process::abort();
        }
    };

    CURRENT.with(|current| current.borrow_mut().take());
    inner.finish(state);

    thread_trace!(thread = %inner.name, ?state, "finished thread");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
