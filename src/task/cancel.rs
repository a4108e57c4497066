use crate::error::DispatchError;
use crate::task::TaskState;
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation signal handed to a task body.
///
/// Cancellation is advisory for the body: a body that never looks at its
/// token keeps running until it returns. Bodies should poll [`checkpoint`]
/// at loop boundaries and use [`sleep`] instead of `thread::sleep` so a
/// cancel request interrupts the wait immediately.
///
/// [`checkpoint`]: CancelToken::checkpoint
/// [`sleep`]: CancelToken::sleep
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TaskState>,
}

impl CancelToken {
    pub(crate) fn new(state: Arc<TaskState>) -> Self {
        Self { state }
    }

    /// Whether cancellation has been requested for this run.
    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    /// Bails out with [`DispatchError::Canceled`] if cancellation has been
    /// requested, so a body can write `token.checkpoint()?;`.
    pub fn checkpoint(&self) -> Result<(), DispatchError> {
        if self.is_canceled() {
            Err(DispatchError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Interruptible sleep: returns `Ok(())` after `duration`, or
    /// `Err(Canceled)` as soon as cancellation is requested, whichever
    /// comes first.
    pub fn sleep(&self, duration: Duration) -> Result<(), DispatchError> {
        self.state.sleep_interruptibly(duration)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
