use crate::error::DispatchError;
use crate::log::LogHandle;
use crate::utils::DropGuard;
use crate::utils::thread::{ThreadNameFn, set_background_priority};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Idle workers above the core count retire after this long.
const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Worker Pool backlog capacity.
const BACKLOG_CAPACITY: usize = 128;

/// Core workers: one less than the CPU count to avoid saturation, but at
/// least 2 and at most 4.
fn core_pool_size() -> usize {
    let cpus = thread::available_parallelism().map_or(1, |n| n.get());
    cpus.saturating_sub(1).clamp(2, 4)
}

fn maximum_pool_size() -> usize {
    core_pool_size() * 2 + 1
}

#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    /// Short label used in errors and logs.
    pub(crate) name: &'static str,
    pub(crate) core_threads: usize,
    pub(crate) max_threads: usize,
    pub(crate) keep_alive: Duration,
    /// Backlog capacity. Zero makes the backlog a rendezvous queue: a
    /// submission only proceeds once a worker is immediately available.
    pub(crate) backlog: usize,
    pub(crate) thread_name: ThreadNameFn,
}

impl PoolConfig {
    /// General background work: bounded backlog, reserved core workers.
    pub(crate) fn worker() -> Self {
        Self {
            name: "worker",
            core_threads: core_pool_size(),
            max_threads: maximum_pool_size(),
            keep_alive: KEEP_ALIVE,
            backlog: BACKLOG_CAPACITY,
            thread_name: ThreadNameFn::sequential("taskwheel-worker"),
        }
    }

    /// Deadline-bounded work: zero reserved workers and a rendezvous
    /// backlog, so a fresh thread spins up per timeout-bound task instead of
    /// contending with steady-state background work.
    pub(crate) fn timeout() -> Self {
        Self {
            name: "timeout",
            core_threads: 0,
            max_threads: maximum_pool_size(),
            keep_alive: KEEP_ALIVE,
            backlog: 0,
            thread_name: ThreadNameFn::sequential("taskwheel-timeout"),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A bounded thread pool with a bounded backlog.
///
/// Admission follows the classic executor order: bring up a core worker,
/// else enqueue, else bring up an extra worker (handing it the job
/// directly), else reject with [`DispatchError::PoolExhausted`]. Extra
/// workers retire after `keep_alive` idle; core workers block indefinitely.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    cfg: PoolConfig,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    /// Current worker-thread count, incremented before spawn.
    live: AtomicUsize,
    log: Arc<LogHandle>,
}

impl WorkerPool {
    pub(crate) fn new(cfg: PoolConfig, log: Arc<LogHandle>) -> Self {
        let (tx, rx) = bounded(cfg.backlog);
        Self {
            inner: Arc::new(PoolInner {
                cfg,
                tx,
                rx,
                live: AtomicUsize::new(0),
                log,
            }),
        }
    }

    /// Enqueues work for background execution; returns immediately. The only
    /// failure mode is pool exhaustion, reported synchronously.
    pub(crate) fn submit(
        &self,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<(), DispatchError> {
        self.submit_boxed(Box::new(job))
    }

    fn submit_boxed(&self, job: Job) -> Result<(), DispatchError> {
        let inner = &self.inner;

        // Below the core count: bring a core worker up first, then hand the
        // job over through the backlog.
        if inner.try_reserve_slot(inner.cfg.core_threads) {
            inner.spawn_worker(None, true);
        }

        match inner.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                if inner.try_reserve_slot(inner.cfg.max_threads) {
                    // Extra worker runs the rejected job directly before
                    // joining the backlog loop.
                    inner.spawn_worker(Some(job), false);
                    Ok(())
                } else {
                    // A worker may have freed up while we were looking.
                    inner
                        .tx
                        .try_send(job)
                        .map_err(|_| inner.exhausted())
                }
            }
            // The pool owns its receiver for its whole lifetime.
            Err(TrySendError::Disconnected(_)) => Err(inner.exhausted()),
        }
    }

    #[cfg(test)]
    pub(crate) fn live_threads(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }
}

impl PoolInner {
    /// Claims a worker slot if the live count is below `limit`.
    fn try_reserve_slot(&self, limit: usize) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .is_ok()
    }

    fn exhausted(&self) -> DispatchError {
        DispatchError::PoolExhausted {
            pool: self.cfg.name,
            max_threads: self.cfg.max_threads,
            backlog: self.cfg.backlog,
        }
    }

    fn spawn_worker(self: &Arc<Self>, first: Option<Job>, core: bool) {
        let inner = self.clone();
        thread::Builder::new()
            .name((self.cfg.thread_name.0)())
            .spawn(move || inner.worker_loop(first, core))
            .expect("failed to spawn pool worker thread");
    }

    fn worker_loop(self: Arc<Self>, first: Option<Job>, core: bool) {
        set_background_priority();

        // Retirement bookkeeping must run however this loop exits.
        let retired = self.clone();
        let _guard = DropGuard::new(move || {
            retired.live.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(target: "taskwheel", pool = retired.cfg.name, "worker retiring");
        });

        if let Some(job) = first {
            self.run_job(job);
        }

        loop {
            let job = if core {
                match self.rx.recv() {
                    Ok(job) => job,
                    Err(_) => return,
                }
            } else {
                match self.rx.recv_timeout(self.cfg.keep_alive) {
                    Ok(job) => job,
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return,
                }
            };
            self.run_job(job);
        }
    }

    fn run_job(&self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            self.log
                .error(&format!("background job panicked on `{}` pool", self.cfg.name));
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.cfg.name)
            .field("live", &self.inner.live.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
