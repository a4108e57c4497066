use parking_lot::RwLock;
use std::sync::Arc;

/// Pluggable log sink for host applications.
///
/// The dispatcher reports submissions, cancellations, and panics caught at
/// the queue boundary through whatever sink is registered. The default sink
/// forwards to `tracing`.
pub trait LogSink: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default sink, emits `tracing` events under the `taskwheel` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!(target: "taskwheel", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "taskwheel", "{message}");
    }
}

/// Shared handle to the currently registered sink. The sink can be swapped
/// at any time; readers take a cheap `Arc` clone so a slow sink never holds
/// the lock across a log call.
pub(crate) struct LogHandle {
    sink: RwLock<Arc<dyn LogSink>>,
}

impl LogHandle {
    pub(crate) fn new() -> Self {
        Self {
            sink: RwLock::new(Arc::new(TracingSink)),
        }
    }

    pub(crate) fn replace(&self, sink: Arc<dyn LogSink>) {
        *self.sink.write() = sink;
    }

    fn current(&self) -> Arc<dyn LogSink> {
        self.sink.read().clone()
    }

    pub(crate) fn info(&self, message: &str) {
        self.current().info(message);
    }

    pub(crate) fn error(&self, message: &str) {
        self.current().error(message);
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle").finish_non_exhaustive()
    }
}
