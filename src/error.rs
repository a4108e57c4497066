/// A centralized error type for all dispatch operations.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    /// A background submission could not be accepted: every worker is busy,
    /// the pool is at its maximum thread count, and the backlog is full.
    /// This is the only condition reported synchronously to the submitting
    /// thread; it is never silently dropped.
    #[error("pool `{pool}` exhausted: {max_threads} workers busy and backlog of {backlog} full")]
    PoolExhausted {
        pool: &'static str,
        max_threads: usize,
        backlog: usize,
    },

    /// Cancellation was requested for the running task. Returned by
    /// [`CancelToken`](crate::CancelToken) checkpoints so a cooperative body
    /// can bail out with `?`.
    #[error("task canceled")]
    Canceled,
}

impl DispatchError {
    /// Whether this error is the cooperative-cancellation signal rather than
    /// a real failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, DispatchError::Canceled)
    }
}
