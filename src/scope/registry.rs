use super::{Scope, ScopeEvent, ScopeObserver};
use parking_lot::Mutex;
use std::sync::Arc;

/// A ready-made [`Scope`] implementation for hosts that do not bring their
/// own lifecycle object: an observer list plus an [`emit`] fan-out.
///
/// Emit events from the affinity thread; the dispatcher assumes event
/// delivery happens on the same context observers were registered from.
///
/// [`emit`]: ScopeRegistry::emit
#[derive(Default)]
pub struct ScopeRegistry {
    observers: Mutex<Vec<Arc<dyn ScopeObserver>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every registered observer.
    pub fn emit(&self, event: ScopeEvent) {
        // Snapshot first: observers remove themselves on their target event,
        // and that re-entrant removal must not deadlock the fan-out.
        let snapshot: Vec<_> = self.observers.lock().clone();
        for observer in snapshot {
            observer.on_scope_event(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl Scope for ScopeRegistry {
    fn add_observer(&self, observer: Arc<dyn ScopeObserver>) {
        self.observers.lock().push(observer);
    }

    fn remove_observer(&self, observer: &dyn ScopeObserver) {
        self.observers
            .lock()
            .retain(|o| !std::ptr::addr_eq(Arc::as_ptr(o), observer));
    }
}

impl std::fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeRegistry")
            .field("observers", &self.observer_count())
            .finish()
    }
}
