use std::path::PathBuf;
use std::sync::Arc;

use crate::dispatch::Completion;
use crate::error::ReactorError;
use crate::native::{self, NativeBatchCommand};
use crate::results::{BatchResult, FileLoadResult, RawResult, ResultSet};
use crate::statement::PreparedStatement;
use crate::types::{RowValues, convert_params};

use super::Connection;

/// One entry of [`Connection::execute_batch`].
///
/// Each parameter set runs the query once; an empty `params` list runs it once without
/// parameters. A query holding several statements runs all of them.
#[derive(Debug, Clone, Default)]
pub struct BatchCommand {
    pub query: String,
    pub params: Vec<Vec<RowValues>>,
}

impl BatchCommand {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Vec<RowValues>) -> Self {
        self.params.push(params);
        self
    }
}

fn require_query(query: &str) -> Result<(), ReactorError> {
    if query.trim().is_empty() {
        return Err(ReactorError::validation("query must not be empty"));
    }
    Ok(())
}

impl Connection {
    /// Run `query` on the worker.
    ///
    /// `query` may hold several statements; they run in order and stop at the first failure.
    /// Rows come from the last statement that returns columns, and `rows_affected` sums every
    /// write. `params` bind to each statement that has placeholders.
    ///
    /// # Errors
    /// Synchronously returns `ValidationError` for an empty query and `StateError` once the
    /// connection is invalidated. Engine failures reject the returned completion.
    pub fn execute(
        &self,
        query: impl Into<String>,
        params: &[RowValues],
    ) -> Result<Completion<ResultSet>, ReactorError> {
        let query = query.into();
        require_query(&query)?;
        let params = convert_params(params);
        self.core.spawn_task("execute", move |core| {
            core.native
                .with(|conn| native::run_query(conn, &query, &params, false))
        })
    }

    /// Run `query` on the calling thread, blocking until it finishes.
    ///
    /// Waits behind any task currently holding the database on the worker. Update
    /// notifications caused by the write are still delivered through the dispatcher.
    ///
    /// # Errors
    /// Returns every error synchronously.
    pub fn execute_sync(&self, query: &str, params: &[RowValues]) -> Result<ResultSet, ReactorError> {
        require_query(query)?;
        self.core.ensure_valid()?;
        let params = convert_params(params);
        self.core
            .native
            .with(|conn| native::run_query(conn, query, &params, false))
    }

    /// Like [`Connection::execute`], but rows come back as plain value arrays.
    ///
    /// # Errors
    /// Same as [`Connection::execute`].
    pub fn execute_raw(
        &self,
        query: impl Into<String>,
        params: &[RowValues],
    ) -> Result<Completion<RawResult>, ReactorError> {
        let query = query.into();
        require_query(&query)?;
        let params = convert_params(params);
        self.core.spawn_task("execute_raw", move |core| {
            core.native
                .with(|conn| native::build_raw_result(conn, &query, &params))
        })
    }

    /// Like [`Connection::execute`], with column metadata attached to the result.
    ///
    /// # Errors
    /// Same as [`Connection::execute`].
    pub fn execute_with_host_objects(
        &self,
        query: impl Into<String>,
        params: &[RowValues],
    ) -> Result<Completion<ResultSet>, ReactorError> {
        let query = query.into();
        require_query(&query)?;
        let params = convert_params(params);
        self.core.spawn_task("execute_with_host_objects", move |core| {
            core.native
                .with(|conn| native::run_query(conn, &query, &params, true))
        })
    }

    /// Run every command in one transaction. The first failure rolls back all of them.
    ///
    /// # Errors
    /// Synchronously returns `ValidationError` for an empty command list or an empty query.
    pub fn execute_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> Result<Completion<BatchResult>, ReactorError> {
        if commands.is_empty() {
            return Err(ReactorError::validation(
                "batch must contain at least one command",
            ));
        }
        let commands = commands
            .into_iter()
            .map(|command| {
                require_query(&command.query)?;
                Ok(NativeBatchCommand {
                    params: command.params.iter().map(|set| convert_params(set)).collect(),
                    query: command.query,
                })
            })
            .collect::<Result<Vec<_>, ReactorError>>()?;
        self.core.spawn_task("execute_batch", move |core| {
            core.native
                .with(|conn| native::execute_batch(conn, &commands))
        })
    }

    /// Import a SQL file holding one statement per line, in a single transaction.
    ///
    /// # Errors
    /// Synchronously returns `ValidationError` for an empty path. A missing file rejects the
    /// completion.
    pub fn load_file(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<Completion<FileLoadResult>, ReactorError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ReactorError::validation("file path must not be empty"));
        }
        self.core.spawn_task("load_file", move |core| {
            core.native
                .with(|conn| native::import_sql_file(conn, &path))
        })
    }

    /// Compile `query` now and return a reusable statement bound to this connection.
    ///
    /// # Errors
    /// `ValidationError` for an empty query or one holding more than one statement,
    /// `StateError` on an invalidated connection, and `SqliteError` if the statement does not
    /// compile.
    pub fn prepare_statement(&self, query: &str) -> Result<PreparedStatement, ReactorError> {
        require_query(query)?;
        self.core.ensure_valid()?;
        let parameter_count = self
            .core
            .native
            .with(|conn| native::single_statement_parameters(conn, query))?;
        Ok(PreparedStatement::new(
            Arc::downgrade(&self.core),
            Arc::new(query.to_owned()),
            parameter_count,
        ))
    }
}
