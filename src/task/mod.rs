use crate::log::LogHandle;
use crate::queue::SerialQueue;
use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

pub(crate) mod cancel;
pub use cancel::CancelToken;


/// The cancellable, result-producing unit of background work.
///
/// `run` executes on a pool thread; the three outcome callbacks execute on
/// the affinity queue. Per submission, at most one of `on_success`/`on_fail`
/// is delivered, gated by "not canceled"; `on_cancel` is delivered exactly
/// once if [`TaskHandle::cancel`] is called. The one documented race: a
/// cancel requested after the outcome has already been posted still delivers
/// `on_cancel`, so a late cancel can observe both callbacks.
pub trait Task: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Background body. Treat the token as the interruption signal: poll
    /// [`CancelToken::checkpoint`] at loop boundaries and propagate its
    /// error with `?`.
    fn run(&self, cancel: &CancelToken) -> Result<Self::Output>;

    /// Delivered on the affinity queue when the body returns `Ok`.
    fn on_success(&self, value: Self::Output);

    /// Delivered on the affinity queue when the body returns `Err`.
    /// Cancellation-triggered errors never reach this path.
    fn on_fail(&self, err: anyhow::Error) {
        let _ = err;
    }

    /// Delivered on the affinity queue when the task is canceled.
    fn on_cancel(&self) {}
}

/// Per-submission execution state: the cancellation flag, the set-once
/// owning thread, and the completion signal the timeout watcher waits on.
/// All flag reads/writes are lock-free; the mutex exists only to pair with
/// the condvar for the two blocking waits.
pub(crate) struct TaskState {
    canceled: AtomicBool,
    owner: OnceLock<Thread>,
    done: Mutex<bool>,
    condvar: Condvar,
}

impl TaskState {
    pub(crate) fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            owner: OnceLock::new(),
            done: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Flips the cancellation flag. Only the first caller gets `true` and
    /// performs the wakeups; a second cancel has no further effect.
    pub(crate) fn request_cancel(&self) -> bool {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return false;
        }

        // Lock-then-notify so a body that checked the flag and is about to
        // block on the condvar cannot miss the wakeup.
        {
            let _guard = self.done.lock();
            self.condvar.notify_all();
        }

        // Best-effort interrupt of a body parked outside our condvar.
        if let Some(owner) = self.owner.get() {
            owner.unpark();
        }

        true
    }

    /// Records the pool thread that picked the task up. Set-once.
    pub(crate) fn record_owner(&self) {
        let _ = self.owner.set(thread::current());
    }

    pub(crate) fn owner_name(&self) -> Option<String> {
        self.owner.get().and_then(|t| t.name().map(String::from))
    }

    pub(crate) fn mark_done(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.condvar.notify_all();
    }

    /// Blocks until the body finishes or `timeout` elapses. Returns whether
    /// the body finished.
    pub(crate) fn wait_done(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.condvar.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }

    /// See [`CancelToken::sleep`].
    pub(crate) fn sleep_interruptibly(
        &self,
        duration: Duration,
    ) -> Result<(), crate::DispatchError> {
        let deadline = Instant::now() + duration;
        let mut done = self.done.lock();
        loop {
            if self.is_canceled() {
                return Err(crate::DispatchError::Canceled);
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            self.condvar.wait_until(&mut done, deadline);
        }
    }
}

/// Handle to one submission of a [`Task`]. Cloneable; all clones refer to
/// the same run.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
    /// Posts `on_cancel` to the affinity queue. Invoked at most once, by
    /// whichever clone wins the cancellation flag.
    cancel_hook: Arc<dyn Fn() + Send + Sync>,
}

impl TaskHandle {
    pub(crate) fn new(state: Arc<TaskState>, cancel_hook: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { state, cancel_hook }
    }

    /// Requests cooperative cancellation: sets the flag, interrupts the
    /// owning thread if the body is already running, and posts `on_cancel`
    /// to the affinity queue. Idempotent; the second call is a no-op.
    ///
    /// This cannot forcibly stop a non-cooperative body. The flag gates
    /// outcome delivery, so `on_success`/`on_fail` will not fire once the
    /// cancel has been observed, but a cancel that races with natural
    /// completion may arrive after the outcome was already posted.
    pub fn cancel(&self) {
        if self.state.request_cancel() {
            (self.cancel_hook)();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    pub(crate) fn wait_done(&self, timeout: Duration) -> bool {
        self.state.wait_done(timeout)
    }

    pub(crate) fn state(&self) -> &Arc<TaskState> {
        &self.state
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("canceled", &self.is_canceled())
            .field("owner", &self.state.owner_name())
            .finish()
    }
}

/// Execution protocol, run on a pool thread.
///
/// Pickup records the owner thread; a task canceled before pickup skips its
/// body entirely so only `on_cancel` is ever delivered for it. Outcome
/// callbacks are posted to the affinity queue behind the cancellation-flag
/// guard. The done signal is raised in every path so a timeout watcher
/// never waits on a task that already settled.
pub(crate) fn run_task<T: Task>(
    task: &Arc<T>,
    state: &Arc<TaskState>,
    affinity: &SerialQueue,
    log: &Arc<LogHandle>,
) {
    state.record_owner();

    if state.is_canceled() {
        state.mark_done();
        return;
    }

    let token = CancelToken::new(state.clone());
    let result = task.run(&token);
    state.mark_done();

    match result {
        Ok(value) => {
            let task = task.clone();
            let state = state.clone();
            affinity.post(move || {
                if !state.is_canceled() {
                    task.on_success(value);
                }
            });
        }
        Err(err) => {
            log.error(&format!("background task body failed: {err:#}"));
            let task = task.clone();
            let state = state.clone();
            affinity.post(move || {
                if !state.is_canceled() {
                    task.on_fail(err);
                }
            });
        }
    }
}
