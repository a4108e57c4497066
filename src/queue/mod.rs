use crate::log::LogHandle;
use crate::utils::thread::set_background_priority;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};


/// Identifies a pending callback on a [`SerialQueue`] so it can be removed
/// before it runs.
///
/// Ids are minted from one process-wide counter, so a token can never alias
/// a callback posted to a different queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackToken(u64);

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(0);

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A single serial execution context: one dedicated thread draining a
/// time-ordered callback queue.
///
/// The dispatcher designates one instance as the affinity context (where all
/// task outcome callbacks are delivered) and a second one for ordered
/// I/O-like work. Callbacks with the same deadline run in post order, and a
/// callback that panics is caught and logged at the dispatch boundary rather
/// than tearing down the queue thread.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    condvar: Condvar,
    /// Set once by the queue thread before it starts draining.
    thread_id: OnceLock<ThreadId>,
    log: Arc<LogHandle>,
}

struct State {
    pending: BinaryHeap<Entry>,
    /// Tie-breaker so equal deadlines preserve post order.
    seq: u64,
    shutdown: bool,
}

struct Entry {
    run_at: Instant,
    seq: u64,
    id: u64,
    callback: Callback,
}

// BinaryHeap is a max-heap; order entries so the earliest deadline (lowest
// sequence number on ties) is the greatest element.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl SerialQueue {
    /// Spawns the queue thread and returns a handle to it.
    pub(crate) fn spawn(name: impl Into<String>, log: Arc<LogHandle>) -> Self {
        let name = name.into();
        let inner = Arc::new(Inner {
            name: name.clone(),
            state: Mutex::new(State {
                pending: BinaryHeap::new(),
                seq: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
            thread_id: OnceLock::new(),
            log,
        });

        let loop_inner = inner.clone();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || loop_inner.run_loop())
            .expect("failed to spawn serial queue thread");

        // Also recorded from the spawning side so `is_current` is correct
        // even before the queue thread gets scheduled.
        let _ = inner.thread_id.set(handle.thread().id());

        Self { inner }
    }

    /// Enqueues a callback for execution as soon as the queue drains to it.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) -> CallbackToken {
        self.post_delayed(callback, Duration::ZERO)
    }

    /// Enqueues a callback to run no earlier than `delay` from now. Equal
    /// deadlines run in post order.
    pub fn post_delayed(
        &self,
        callback: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> CallbackToken {
        let id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
        let run_at = Instant::now() + delay;

        let mut state = self.inner.state.lock();
        if !state.shutdown {
            state.seq += 1;
            let seq = state.seq;
            state.pending.push(Entry {
                run_at,
                seq,
                id,
                callback: Box::new(callback),
            });
            self.inner.condvar.notify_one();
        }

        CallbackToken(id)
    }

    /// Best-effort removal of a pending callback. A no-op if the callback
    /// already ran, was already removed, or never belonged to this queue.
    pub fn remove(&self, token: CallbackToken) {
        let mut state = self.inner.state.lock();
        state.pending.retain(|entry| entry.id != token.0);
    }

    /// Whether the caller is running on this queue's thread.
    pub fn is_current(&self) -> bool {
        self.inner
            .thread_id
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    /// The queue's diagnostic thread name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Stops the queue thread after it finishes the callback it is currently
    /// running. Pending callbacks are discarded. The facade never calls this;
    /// it exists so short-lived queues in tests do not leak threads.
    #[cfg(test)]
    pub(crate) fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        state.pending.clear();
        self.inner.condvar.notify_one();
    }
}

impl Inner {
    fn run_loop(self: Arc<Self>) {
        let _ = self.thread_id.set(thread::current().id());
        set_background_priority();

        loop {
            let entry = {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    match state.pending.peek().map(|e| e.run_at) {
                        Some(run_at) if run_at <= Instant::now() => break state.pending.pop(),
                        Some(run_at) => {
                            self.condvar.wait_until(&mut state, run_at);
                        }
                        None => self.condvar.wait(&mut state),
                    }
                }
            };

            if let Some(entry) = entry {
                self.dispatch(entry);
            }
        }
    }

    /// Runs one callback with the host-loop protection: a panic is caught
    /// and logged here, never propagated into the queue loop.
    fn dispatch(&self, entry: Entry) {
        let callback = entry.callback;
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            self.log
                .error(&format!("callback panicked on `{}` queue", self.name));
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}
