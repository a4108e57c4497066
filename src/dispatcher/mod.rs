use crate::error::DispatchError;
use crate::log::{LogHandle, LogSink};
use crate::queue::{CallbackToken, SerialQueue};
use crate::scope::{Scope, ScopeEvent, ScopedJob};
use crate::task::{Task, TaskHandle, TaskState, run_task};
use crate::utils::thread::ThreadNameFn;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

pub(crate) mod pool;
use pool::{PoolConfig, WorkerPool};

pub(crate) mod periodic;
pub use periodic::{Periodic, PeriodicBuilder};


static GLOBAL: OnceLock<TaskDispatcher> = OnceLock::new();

/// The dispatch facade: owns the worker pools, the affinity queue, and the
/// io queue, and exposes every submission operation.
///
/// Use [`TaskDispatcher::global`] for the process-wide instance. It is
/// constructed lazily on first use, exactly once under concurrent
/// initialization, and never torn down.
pub struct TaskDispatcher {
    /// General background work.
    worker_pool: WorkerPool,
    /// Deadline-bounded work; zero reserved workers and a rendezvous
    /// backlog keep deadline contention away from the worker pool.
    timeout_pool: WorkerPool,
    /// The single serial context all outcome callbacks are delivered to.
    affinity: SerialQueue,
    /// A dedicated serial context for ordered I/O-like work.
    io: SerialQueue,
    scheduler_names: ThreadNameFn,
    log: Arc<LogHandle>,
}

impl TaskDispatcher {
    /// The process-wide dispatcher.
    pub fn global() -> &'static TaskDispatcher {
        GLOBAL.get_or_init(TaskDispatcher::new)
    }

    pub(crate) fn new() -> Self {
        Self::with_pools(PoolConfig::worker(), PoolConfig::timeout())
    }

    pub(crate) fn with_pools(worker: PoolConfig, timeout: PoolConfig) -> Self {
        let log = Arc::new(LogHandle::new());
        Self {
            worker_pool: WorkerPool::new(worker, log.clone()),
            timeout_pool: WorkerPool::new(timeout, log.clone()),
            affinity: SerialQueue::spawn("taskwheel-affinity", log.clone()),
            io: SerialQueue::spawn("taskwheel-io", log.clone()),
            scheduler_names: ThreadNameFn::sequential("taskwheel-scheduler"),
            log,
        }
    }

    /// Runs a fire-and-forget closure on the worker pool.
    pub fn execute_job(
        &self,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<(), DispatchError> {
        self.log.info("execute background job");
        self.worker_pool.submit(job)
    }

    /// Submits a [`Task`] to the worker pool. The returned handle cancels
    /// this submission; submitting the same task again yields an
    /// independent handle with fresh cancellation state.
    pub fn execute<T: Task>(&self, task: Arc<T>) -> Result<TaskHandle, DispatchError> {
        self.log.info("execute task");
        self.launch(&self.worker_pool, task)
    }

    /// Submits a [`Task`] to the timeout pool and arranges for it to be
    /// canceled if its body has not finished within `timeout`.
    ///
    /// The deadline is soft: it triggers the cooperative-cancellation path,
    /// guaranteeing the `on_cancel` callback fires within roughly the
    /// timeout window, while a body that ignores its token keeps running.
    pub fn execute_with_timeout<T: Task>(
        &self,
        timeout: Duration,
        task: Arc<T>,
    ) -> Result<TaskHandle, DispatchError> {
        self.log.info("execute task with timeout");
        let handle = self.launch(&self.timeout_pool, task)?;

        // The watcher blocks on the task's done signal from a second
        // timeout-pool thread; expiry routes the cancel through the affinity
        // queue, guarded against tasks that were already canceled.
        let watcher = handle.clone();
        let affinity = self.affinity.clone();
        let watch = self.timeout_pool.submit(move || {
            if !watcher.wait_done(timeout) {
                affinity.post(move || {
                    if !watcher.is_canceled() {
                        watcher.cancel();
                    }
                });
            }
        });
        if let Err(err) = watch {
            // The body is already in flight with nothing holding its
            // deadline; cancel it instead of leaving it running unobserved.
            handle.cancel();
            return Err(err);
        }

        Ok(handle)
    }

    fn launch<T: Task>(
        &self,
        pool: &WorkerPool,
        task: Arc<T>,
    ) -> Result<TaskHandle, DispatchError> {
        // Fresh state per submission: no stale cancellation carries over.
        let state = Arc::new(TaskState::new());

        let cancel_hook = {
            let task = task.clone();
            let state = state.clone();
            let affinity = self.affinity.clone();
            let log = self.log.clone();
            Arc::new(move || {
                if let Some(owner) = state.owner_name() {
                    log.info(&format!("task cancel requested, owner `{owner}`"));
                }
                let task = task.clone();
                affinity.post(move || task.on_cancel());
            })
        };
        let handle = TaskHandle::new(state, cancel_hook);

        let body_state = handle.state().clone();
        let affinity = self.affinity.clone();
        let log = self.log.clone();
        pool.submit(move || run_task(&task, &body_state, &affinity, &log))?;

        Ok(handle)
    }

    /// Requests cancellation of a submitted task. Equivalent to
    /// [`TaskHandle::cancel`]; idempotent.
    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
    }

    /// Posts a callback to the affinity queue.
    pub fn post_to_affinity(&self, callback: impl FnOnce() + Send + 'static) -> CallbackToken {
        self.affinity.post(callback)
    }

    /// Posts a callback to the affinity queue after `delay`.
    pub fn post_to_affinity_delayed(
        &self,
        callback: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> CallbackToken {
        self.affinity.post_delayed(callback, delay)
    }

    /// Removes a pending affinity callback. No-op if it already ran.
    pub fn remove_affinity_callback(&self, token: CallbackToken) {
        self.affinity.remove(token);
    }

    /// Whether the caller is on the affinity thread.
    pub fn is_affinity_context(&self) -> bool {
        self.affinity.is_current()
    }

    /// Posts a scope-bound callback to the affinity queue, canceled if the
    /// scope reaches [`ScopeEvent::Destroy`] first.
    pub fn post_scoped_to_affinity<S: Scope + 'static>(
        &self,
        scope: &Arc<S>,
        callback: impl FnOnce() + Send + 'static,
    ) -> CallbackToken {
        self.post_scoped(scope, &self.affinity, ScopeEvent::Destroy, callback, Duration::ZERO)
    }

    /// Like [`post_scoped_to_affinity`](Self::post_scoped_to_affinity) with
    /// an explicit termination event.
    pub fn post_scoped_to_affinity_on<S: Scope + 'static>(
        &self,
        scope: &Arc<S>,
        target: ScopeEvent,
        callback: impl FnOnce() + Send + 'static,
    ) -> CallbackToken {
        self.post_scoped(scope, &self.affinity, target, callback, Duration::ZERO)
    }

    /// Like [`post_scoped_to_affinity`](Self::post_scoped_to_affinity) with
    /// a delivery delay.
    pub fn post_scoped_to_affinity_delayed<S: Scope + 'static>(
        &self,
        scope: &Arc<S>,
        callback: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> CallbackToken {
        self.post_scoped(scope, &self.affinity, ScopeEvent::Destroy, callback, delay)
    }

    /// Binds `callback` to `scope` and delivers it through `queue` after
    /// `delay`, unless `target` fires first. Exactly one of {callback runs
    /// once, callback never runs} holds, and the scope observer is removed
    /// either way. Binding to a scope that is already gone is a no-op.
    pub fn post_scoped<S: Scope + 'static>(
        &self,
        scope: &Arc<S>,
        queue: &SerialQueue,
        target: ScopeEvent,
        callback: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> CallbackToken {
        let scope: Arc<dyn Scope> = scope.clone();
        ScopedJob::bind(
            &scope,
            target,
            Box::new(callback),
            queue,
            &self.affinity,
            delay,
        )
    }

    /// Activates a periodic task on a dedicated single-thread fixed-rate
    /// scheduler private to the instance. A previously stopped task is
    /// re-armed first.
    pub fn dispatch_periodic(&self, task: &Arc<Periodic>) {
        task.rearm();
        let task = task.clone();
        let affinity = self.affinity.clone();
        thread::Builder::new()
            .name((self.scheduler_names.0)())
            .spawn(move || periodic::run_scheduler(task, affinity))
            .expect("failed to spawn periodic scheduler thread");
    }

    /// Deactivates a periodic task. The scheduler thread tears itself down
    /// on the next tick; at most one already-posted tick may still run.
    pub fn stop_periodic(&self, task: &Periodic) {
        task.cancel();
    }

    /// The affinity execution context.
    pub fn affinity_queue(&self) -> &SerialQueue {
        &self.affinity
    }

    /// A dedicated single-thread serial context for ordered I/O-like work
    /// (database, file access, and similar).
    pub fn io_queue(&self) -> &SerialQueue {
        &self.io
    }

    /// Replaces the log sink. The default forwards to `tracing`.
    pub fn register_log_sink(&self, sink: Arc<dyn LogSink>) {
        self.log.replace(sink);
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("worker_pool", &self.worker_pool)
            .field("timeout_pool", &self.timeout_pool)
            .field("affinity", &self.affinity)
            .field("io", &self.io)
            .finish_non_exhaustive()
    }
}
