//! Reactive queries: subscriptions keyed on table/row writes, re-run on flush.

pub(crate) mod hook;
pub(crate) mod registry;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use hook::{RowOperation, TransactionCallback, UpdateCallback, UpdateEvent};
pub use registry::{QueryId, ReactiveCallback, TableRowDiscriminator};

// User callbacks never run under these locks, so poisoning can only come from a bug in this
// crate; the protected data is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
