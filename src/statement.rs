//! Prepared statements bound to a connection.
//!
//! A [`PreparedStatement`] keeps only a weak reference to its connection. The compiled form
//! lives in the connection's statement cache; the handle owns the SQL, the expected
//! parameter count and the currently bound values. Releasing the handle empties its slot
//! once, and every later call fails with a state error.

use std::sync::{Arc, Mutex, Weak};

use rusqlite::types::Value;
use tracing::debug;

use crate::connection::Shared;
use crate::dispatch::Completion;
use crate::error::ReactorError;
use crate::native;
use crate::reactive::lock;
use crate::results::ResultSet;
use crate::types::{RowValues, convert_params, values_as_tosql};

#[derive(Debug)]
struct CompiledStatement {
    sql: Arc<String>,
    parameter_count: usize,
    bound: Vec<Value>,
}

type Slot = Arc<Mutex<Option<CompiledStatement>>>;

/// Handle returned by [`Connection::prepare_statement`](crate::Connection::prepare_statement).
pub struct PreparedStatement {
    core: Weak<Shared>,
    slot: Slot,
}

impl PreparedStatement {
    pub(crate) fn new(core: Weak<Shared>, sql: Arc<String>, parameter_count: usize) -> Self {
        Self {
            core,
            slot: Arc::new(Mutex::new(Some(CompiledStatement {
                sql,
                parameter_count,
                bound: Vec::new(),
            }))),
        }
    }

    /// SQL text, or `None` once released.
    #[must_use]
    pub fn sql(&self) -> Option<String> {
        lock(&self.slot).as_ref().map(|compiled| compiled.sql.to_string())
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        lock(&self.slot).is_none()
    }

    /// Bind `params` on the worker. They are used by every later [`PreparedStatement::execute`].
    ///
    /// # Errors
    /// Synchronously returns `StateError` for a released statement or a closed connection,
    /// and `ValidationError` if the parameter count does not match the statement.
    pub fn bind(&self, params: &[RowValues]) -> Result<Completion<()>, ReactorError> {
        let core = self.live_core()?;
        let values = convert_params(params);
        let sql = self.check_arity(values.len())?;
        let slot = Arc::clone(&self.slot);
        core.spawn_task("bind_statement", move |core| {
            core.native()
                .with(|conn| bind_values(conn, &sql, &slot, values))
        })
    }

    /// Bind `params` on the calling thread.
    ///
    /// # Errors
    /// Same synchronous errors as [`PreparedStatement::bind`], plus `SqliteError` if a value
    /// cannot be bound.
    pub fn bind_sync(&self, params: &[RowValues]) -> Result<(), ReactorError> {
        let core = self.live_core()?;
        let values = convert_params(params);
        let sql = self.check_arity(values.len())?;
        core.native()
            .with(|conn| bind_values(conn, &sql, &self.slot, values))
    }

    /// Run the statement with its bound values on the worker.
    ///
    /// # Errors
    /// Synchronously returns `StateError` for a released statement or a closed connection.
    /// A statement released after this call was queued rejects the completion.
    pub fn execute(&self) -> Result<Completion<ResultSet>, ReactorError> {
        let core = self.live_core()?;
        self.check_released()?;
        let slot = Arc::clone(&self.slot);
        core.spawn_task("execute_statement", move |core| {
            core.native().with(|conn| {
                let (sql, bound) = {
                    let guard = lock(&slot);
                    let compiled = guard.as_ref().ok_or_else(released)?;
                    (Arc::clone(&compiled.sql), compiled.bound.clone())
                };
                let mut stmt = conn.prepare_cached(&sql)?;
                native::statement_outcome(conn, &mut stmt, &bound)
            })
        })
    }

    /// Free the statement. Returns `true` only for the call that actually released it.
    pub fn release(&self) -> bool {
        let Some(compiled) = lock(&self.slot).take() else {
            return false;
        };
        debug!(sql = %compiled.sql, "released prepared statement");
        true
    }

    fn live_core(&self) -> Result<Arc<Shared>, ReactorError> {
        let core = self
            .core
            .upgrade()
            .ok_or_else(|| ReactorError::state("connection has been dropped"))?;
        core.ensure_valid()?;
        Ok(core)
    }

    fn check_released(&self) -> Result<(), ReactorError> {
        if self.is_released() {
            return Err(released());
        }
        Ok(())
    }

    fn check_arity(&self, given: usize) -> Result<Arc<String>, ReactorError> {
        let guard = lock(&self.slot);
        let compiled = guard.as_ref().ok_or_else(released)?;
        if compiled.parameter_count != given {
            return Err(ReactorError::validation(format!(
                "statement expects {} parameters, got {given}",
                compiled.parameter_count
            )));
        }
        Ok(Arc::clone(&compiled.sql))
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

fn released() -> ReactorError {
    ReactorError::state("statement has been freed")
}

fn bind_values(
    conn: &rusqlite::Connection,
    sql: &str,
    slot: &Mutex<Option<CompiledStatement>>,
    values: Vec<Value>,
) -> Result<(), ReactorError> {
    {
        let mut stmt = conn.prepare_cached(sql)?;
        for (idx, value) in values_as_tosql(&values).into_iter().enumerate() {
            stmt.raw_bind_parameter(idx + 1, value)?;
        }
    }
    let mut guard = lock(slot);
    let compiled = guard.as_mut().ok_or_else(released)?;
    compiled.bound = values;
    Ok(())
}
