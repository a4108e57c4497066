use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Generates names for threads spawned by the dispatcher.
#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

impl ThreadNameFn {
    /// Name fn yielding `{prefix}-{N}` with monotonically increasing N,
    /// so every pool gets human-readable sequential thread names.
    pub(crate) fn sequential(prefix: &'static str) -> Self {
        let counter = Arc::new(AtomicUsize::new(0));

        ThreadNameFn(Arc::new(move || {
            let id = counter.fetch_add(1, Ordering::Relaxed);
            format!("{prefix}-{id}")
        }))
    }
}

impl std::fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Nice value for background work, matching the conventional mobile-OS
/// background priority.
#[cfg(target_os = "linux")]
const BACKGROUND_NICENESS: libc::c_int = 10;

/// Tags the calling thread with background scheduling priority so pool and
/// scheduler threads never compete with the host's latency-sensitive work.
///
/// Linux has per-thread nice values addressed by kernel tid, not pthread id.
#[cfg(target_os = "linux")]
pub(crate) fn set_background_priority() {
    unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS as _, tid, BACKGROUND_NICENESS);
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_background_priority() {}
