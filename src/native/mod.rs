//! Exclusive ownership of the SQLite handle.
//!
//! The handle sits behind a mutex so the worker thread and the caller thread (for the
//! synchronous operations) never touch it at the same time, and behind an `Option` so it can
//! be released exactly once. After release every access reports a state error instead of
//! reaching SQLite.

mod query;

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::ReactorError;

pub(crate) use query::{
    NativeBatchCommand, build_raw_result, execute_batch, import_sql_file, run_query,
    single_statement_parameters, statement_outcome,
};

pub(crate) struct NativeHandle {
    conn: Mutex<Option<rusqlite::Connection>>,
}

impl NativeHandle {
    pub(crate) fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Run `f` with exclusive access to the live connection.
    pub(crate) fn with<T, F>(&self, f: F) -> Result<T, ReactorError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, ReactorError>,
    {
        let mut guard = self.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| ReactorError::state("database connection is closed"))?;
        f(conn)
    }

    /// Close the connection. Returns `false` if it was already released.
    pub(crate) fn release(&self) -> bool {
        let Some(conn) = self.lock().take() else {
            return false;
        };
        if let Err((_conn, err)) = conn.close() {
            // The handle is dropped either way; rusqlite finalizes on drop.
            debug!(error = %err, "sqlite close reported an error");
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<rusqlite::Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Load a SQLite extension into `conn`.
///
/// Extension loading is only enabled for the duration of the call.
#[cfg(feature = "load_extension")]
#[allow(unsafe_code)]
pub(crate) fn load_extension(
    conn: &rusqlite::Connection,
    path: &std::path::Path,
    entry_point: Option<&str>,
) -> Result<(), ReactorError> {
    debug!(path = %path.display(), entry_point, "loading extension");
    // SAFETY: the library runs arbitrary native code in-process. Callers only pass paths they
    // were explicitly configured or asked to load.
    unsafe {
        let _guard = rusqlite::LoadExtensionGuard::new(conn)?;
        conn.load_extension(path, entry_point)?;
    }
    Ok(())
}
