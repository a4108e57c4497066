use crate::dispatcher::TaskDispatcher;
use crate::log::{LogHandle, LogSink};
use crate::queue::SerialQueue;
use crate::task::{CancelToken, Task};
use parking_lot::{Condvar, Mutex};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A private dispatcher instance whose queue threads are stopped on drop,
/// so tests do not leak threads. The global singleton is exercised by a
/// dedicated test instead.
pub(crate) struct TestDispatcher(TaskDispatcher);

impl TestDispatcher {
    pub(crate) fn new() -> Self {
        Self(TaskDispatcher::new())
    }

    /// Wraps a dispatcher built with non-default pool configs.
    pub(crate) fn wrap(dispatcher: TaskDispatcher) -> Self {
        Self(dispatcher)
    }
}

impl Deref for TestDispatcher {
    type Target = TaskDispatcher;

    fn deref(&self) -> &TaskDispatcher {
        &self.0
    }
}

impl Drop for TestDispatcher {
    fn drop(&mut self) {
        self.0.affinity_queue().shutdown();
        self.0.io_queue().shutdown();
    }
}

/// A standalone serial queue with a fresh default log handle.
pub(crate) fn test_queue(name: &'static str) -> SerialQueue {
    SerialQueue::spawn(name, Arc::new(LogHandle::new()))
}

/// Polls `pred` every couple of milliseconds until it holds or `timeout`
/// elapses. Returns whether it held.
pub(crate) fn wait_until(timeout: Duration, pred: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    pred()
}

/// A manually opened gate for holding worker threads in a known state.
pub(crate) struct Gate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    pub(crate) fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.condvar.wait(&mut open);
        }
    }

    pub(crate) fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.condvar.notify_all();
    }
}

/// Captures everything routed through the pluggable log sink.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) infos: Mutex<Vec<String>>,
    pub(crate) errors: Mutex<Vec<String>>,
}

impl LogSink for RecordingSink {
    fn info(&self, message: &str) {
        self.infos.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

/// Ordered record of a task's delivered callbacks.
pub(crate) type Events = Arc<Mutex<Vec<String>>>;

pub(crate) fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn snapshot(events: &Events) -> Vec<String> {
    events.lock().clone()
}

pub(crate) fn wait_for_event(events: &Events, needle: &str, timeout: Duration) -> bool {
    wait_until(timeout, || {
        events.lock().iter().any(|e| e == needle)
    })
}

/// A task whose body is injectable and whose callbacks append to a shared
/// event log (`success:{v}` / `fail:{message}` / `cancel`).
pub(crate) struct ProbeTask {
    body: Box<dyn Fn(&CancelToken) -> anyhow::Result<u32> + Send + Sync>,
    events: Events,
}

impl ProbeTask {
    pub(crate) fn new(
        events: &Events,
        body: impl Fn(&CancelToken) -> anyhow::Result<u32> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            body: Box::new(body),
            events: events.clone(),
        })
    }
}

impl Task for ProbeTask {
    type Output = u32;

    fn run(&self, cancel: &CancelToken) -> anyhow::Result<u32> {
        (self.body)(cancel)
    }

    fn on_success(&self, value: u32) {
        self.events.lock().push(format!("success:{value}"));
    }

    fn on_fail(&self, err: anyhow::Error) {
        self.events.lock().push(format!("fail:{err}"));
    }

    fn on_cancel(&self) {
        self.events.lock().push("cancel".to_string());
    }
}
