//! Background task dispatch with affinity delivery.
//!
//! taskwheel runs units of work on background worker threads and delivers
//! their outcome callbacks onto a single designated "affinity" serial
//! context, with cooperative cancellation, soft execution deadlines,
//! fixed-rate periodic dispatch, and scope-bound callbacks that never fire
//! after their owning scope is gone.
//!
//! The entry point is [`TaskDispatcher::global`].

mod dispatcher;
pub use dispatcher::{Periodic, PeriodicBuilder, TaskDispatcher};

mod error;
pub use error::DispatchError;

mod log;
pub use log::{LogSink, TracingSink};

mod queue;
pub use queue::{CallbackToken, SerialQueue};

mod scope;
pub use scope::{Scope, ScopeEvent, ScopeObserver, ScopeRegistry};

mod task;
pub use task::{CancelToken, Task, TaskHandle};

mod utils;

#[cfg(test)]
mod test_utils;
