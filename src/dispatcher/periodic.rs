use crate::queue::SerialQueue;
use crate::utils::thread::set_background_priority;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// A recurring task driven by its own single-thread fixed-rate scheduler.
///
/// Built with [`Periodic::builder`], activated with
/// [`TaskDispatcher::dispatch_periodic`](crate::TaskDispatcher::dispatch_periodic),
/// and deactivated with
/// [`TaskDispatcher::stop_periodic`](crate::TaskDispatcher::stop_periodic).
/// Cancellation is irreversible for an activation: once the flag is set no
/// further tick invokes the handler, though one tick already posted to the
/// affinity queue may still run. The scheduler thread tears itself down
/// lazily on the next tick that observes the flag.
pub struct Periodic {
    start_delay: Duration,
    period: Duration,
    /// Run the handler on the affinity queue (default) or directly on the
    /// scheduler thread.
    on_affinity: bool,
    canceled: AtomicBool,
    handler: Box<dyn Fn() + Send + Sync + 'static>,
}

impl Periodic {
    /// Returns a builder for a task firing every `period`.
    ///
    /// # Panics
    ///
    /// [`PeriodicBuilder::build`] panics if `period` is zero.
    pub fn builder(period: Duration, handler: impl Fn() + Send + Sync + 'static) -> PeriodicBuilder {
        PeriodicBuilder {
            start_delay: Duration::ZERO,
            period,
            on_affinity: true,
            handler: Box::new(handler),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Clears a leftover cancellation flag so a stopped task can be
    /// dispatched again.
    pub(crate) fn rearm(&self) {
        let _ = self
            .canceled
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Active to Canceled, irreversible for this activation.
    pub(crate) fn cancel(&self) {
        let _ = self
            .canceled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Runs the handler behind the cancellation check, so a tick already in
    /// flight when the task is stopped becomes a no-op.
    pub(crate) fn fire(&self) {
        if !self.is_canceled() {
            (self.handler)();
        }
    }
}

impl std::fmt::Debug for Periodic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Periodic")
            .field("period", &self.period)
            .field("start_delay", &self.start_delay)
            .field("on_affinity", &self.on_affinity)
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

pub struct PeriodicBuilder {
    start_delay: Duration,
    period: Duration,
    on_affinity: bool,
    handler: Box<dyn Fn() + Send + Sync + 'static>,
}

impl PeriodicBuilder {
    /// Delay before the first tick. Defaults to zero (first tick fires
    /// immediately).
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Whether ticks post the handler to the affinity queue (`true`,
    /// default) or run it directly on the scheduler thread.
    pub fn on_affinity(mut self, on_affinity: bool) -> Self {
        self.on_affinity = on_affinity;
        self
    }

    pub fn build(self) -> Arc<Periodic> {
        assert!(!self.period.is_zero(), "period must be greater than zero");
        Arc::new(Periodic {
            start_delay: self.start_delay,
            period: self.period,
            on_affinity: self.on_affinity,
            canceled: AtomicBool::new(false),
            handler: self.handler,
        })
    }
}

/// Fixed-rate scheduler loop, private to one activated [`Periodic`].
///
/// Deadlines advance in absolute time (`next += period`), so a tick that
/// runs late does not push later ticks out; a tick that falls behind fires
/// immediately. Best-effort timing only.
pub(crate) fn run_scheduler(task: Arc<Periodic>, affinity: SerialQueue) {
    set_background_priority();

    let mut next_tick = Instant::now() + task.start_delay;
    loop {
        loop {
            let now = Instant::now();
            if now >= next_tick {
                break;
            }
            thread::sleep(next_tick - now);
        }

        if task.is_canceled() {
            return;
        }

        if task.on_affinity {
            let task = task.clone();
            affinity.post(move || task.fire());
        } else {
            task.fire();
        }

        next_tick += task.period;
    }
}
