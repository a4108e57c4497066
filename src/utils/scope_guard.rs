/// Runs a closure when dropped, however the enclosing scope exits.
///
/// Used for bookkeeping that must hold across early returns and unwinds,
/// such as a pool worker decrementing the live-thread count on retirement.
pub(crate) struct DropGuard<F: FnOnce()> {
    // Wrapped in an Option so the closure can be taken exactly once.
    closure: Option<F>,
}

impl<F: FnOnce()> DropGuard<F> {
    pub(crate) fn new(closure: F) -> Self {
        Self {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for DropGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
