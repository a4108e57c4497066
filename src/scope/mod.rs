use crate::queue::{CallbackToken, SerialQueue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

pub(crate) mod registry;
pub use registry::ScopeRegistry;


/// Discrete lifecycle state-change events a [`Scope`] emits to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeEvent {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
}

/// Receives [`ScopeEvent`]s from a scope the observer is registered with.
pub trait ScopeObserver: Send + Sync {
    fn on_scope_event(&self, event: ScopeEvent);
}

/// An external object with an observable lifecycle.
///
/// The dispatcher only assumes this surface: observers can be added and
/// removed (identified by address, so `remove_observer` with an observer
/// that was never added is a no-op), and events are delivered on the same
/// execution context used for registration — the affinity thread.
pub trait Scope: Send + Sync {
    fn add_observer(&self, observer: Arc<dyn ScopeObserver>);
    fn remove_observer(&self, observer: &dyn ScopeObserver);
}

/// Binds one pending callback delivery to a scope's lifetime.
///
/// The job registers itself as an observer of the scope and schedules the
/// wrapped callback on an execution queue. Whichever comes first wins:
/// delivery runs the callback (if the scope is still alive) and unregisters
/// the observer; the target event firing first unregisters the observer and
/// removes the pending delivery, so the callback never runs. Exactly one of
/// {runs once, never runs} holds, and the observer registration is removed
/// in both cases.
pub(crate) struct ScopedJob {
    scope: Weak<dyn Scope>,
    target: ScopeEvent,
    /// Queue the wrapped callback is delivered through.
    queue: SerialQueue,
    /// Observer registration and removal are routed through here; a scope's
    /// observer list is only ever touched from the affinity thread.
    affinity: SerialQueue,
    callback: Mutex<Option<Box<dyn FnOnce() + Send + 'static>>>,
    token: OnceLock<CallbackToken>,
    /// Arbitrates the delivery-vs-termination race: first swap wins.
    settled: AtomicBool,
}

impl ScopedJob {
    /// Registers the observer and schedules delivery. Binding against a
    /// scope that is already gone degrades to an inert wrapper that never
    /// executes.
    pub(crate) fn bind(
        scope: &Arc<dyn Scope>,
        target: ScopeEvent,
        callback: Box<dyn FnOnce() + Send + 'static>,
        queue: &SerialQueue,
        affinity: &SerialQueue,
        delay: Duration,
    ) -> CallbackToken {
        let job = Arc::new(ScopedJob {
            scope: Arc::downgrade(scope),
            target,
            queue: queue.clone(),
            affinity: affinity.clone(),
            callback: Mutex::new(Some(callback)),
            token: OnceLock::new(),
            settled: AtomicBool::new(false),
        });

        // Observer registration must happen on the affinity thread. When the
        // bind comes from anywhere else it is routed through the queue as a
        // registration request, never a direct cross-thread mutation.
        if affinity.is_current() {
            if let Some(scope) = job.scope.upgrade() {
                scope.add_observer(job.clone());
            }
        } else {
            let job = job.clone();
            affinity.post(move || {
                // A zero-delay delivery on another queue may have settled the
                // job before this registration ran; registering now would
                // leak the observer.
                if !job.settled.load(Ordering::Acquire)
                    && let Some(scope) = job.scope.upgrade()
                {
                    scope.add_observer(job.clone());
                }
            });
        }

        let delivery = job.clone();
        let token = queue.post_delayed(move || delivery.deliver(), delay);
        let _ = job.token.set(token);
        token
    }

    /// Runs on `queue` when the pending delivery comes due.
    fn deliver(self: &Arc<Self>) {
        if self.settled.swap(true, Ordering::AcqRel) {
            // Terminated by the scope event first; nothing to do.
            return;
        }

        let scope = self.scope.upgrade();

        // A scope that ended before delivery is expected steady-state
        // behavior: skip silently, but still drop the callback.
        let callback = self.callback.lock().take();
        if scope.is_some()
            && let Some(callback) = callback
        {
            callback();
        }

        if let Some(scope) = scope {
            self.unregister(scope);
        }
    }

    /// Removes the observer registration, from the affinity thread.
    fn unregister(self: &Arc<Self>, scope: Arc<dyn Scope>) {
        if self.affinity.is_current() {
            scope.remove_observer(&**self);
        } else {
            let job = self.clone();
            self.affinity.post(move || {
                scope.remove_observer(&*job);
            });
        }
    }
}

impl ScopeObserver for ScopedJob {
    /// Delivered on the affinity thread. The first matching target event
    /// cancels the pending delivery and drops the observer registration.
    fn on_scope_event(&self, event: ScopeEvent) {
        if event != self.target {
            return;
        }
        if self.settled.swap(true, Ordering::AcqRel) {
            return;
        }

        self.callback.lock().take();
        if let Some(token) = self.token.get() {
            self.queue.remove(*token);
        }
        if let Some(scope) = self.scope.upgrade() {
            scope.remove_observer(self);
        }
    }
}
