pub(crate) mod scope_guard;
pub(crate) use scope_guard::DropGuard;

pub(crate) mod thread;
