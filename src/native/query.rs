use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Batch, Connection, Statement, TransactionBehavior};

use crate::error::ReactorError;
use crate::results::{BatchResult, ColumnMetadata, FileLoadResult, RawResult, ResultSet};
use crate::types::{sqlite_value_to_row_value, values_as_tosql, RowValues};

/// Batch entry with parameters already converted for the worker.
pub(crate) struct NativeBatchCommand {
    pub(crate) query: String,
    pub(crate) params: Vec<Vec<Value>>,
}

fn extract_row(row: &rusqlite::Row<'_>, col_count: usize) -> Result<Vec<RowValues>, ReactorError> {
    let mut values = Vec::with_capacity(col_count);
    for idx in 0..col_count {
        let value: Value = row.get(idx)?;
        values.push(sqlite_value_to_row_value(value));
    }
    Ok(values)
}

/// Run `stmt` with `params` and collect every row.
///
/// Column metadata (declared types) is only gathered when `with_metadata` is set.
///
/// # Errors
/// Returns `ReactorError::SqliteError` if binding, stepping or value extraction fails.
fn build_result_set(
    stmt: &mut Statement<'_>,
    params: &[Value],
    with_metadata: bool,
) -> Result<ResultSet, ReactorError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    if with_metadata {
        let metadata = stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(index, column)| ColumnMetadata {
                name: column.name().to_owned(),
                declared_type: column.decl_type().map(str::to_owned),
                index,
            })
            .collect();
        result_set.set_metadata(metadata);
    }
    result_set.set_column_names(Arc::new(column_names));

    let param_refs = values_as_tosql(params);
    let mut rows = stmt.query(&param_refs[..])?;
    while let Some(row) = rows.next()? {
        result_set.add_row_values(extract_row(row, col_count)?);
    }
    Ok(result_set)
}

/// Rows written by a run of one or more statements.
///
/// A statement counts as a write only if it moved `total_changes`; `changes()` alone keeps
/// the count of the last DML statement across DDL.
#[derive(Debug, Default)]
struct WriteTally {
    rows_affected: usize,
    insert_id: Option<i64>,
}

impl WriteTally {
    fn record(&mut self, conn: &Connection, total_before: u64) {
        if conn.total_changes() == total_before {
            return;
        }
        let changed = usize::try_from(conn.changes()).unwrap_or(usize::MAX);
        self.rows_affected = self.rows_affected.saturating_add(changed);
        if changed > 0 {
            self.insert_id = Some(conn.last_insert_rowid());
        }
    }

    fn apply(self, rows_affected: &mut usize, insert_id: &mut Option<i64>) {
        *rows_affected = self.rows_affected;
        *insert_id = self.insert_id;
    }
}

/// Run every statement in `sql` in order, handing each to `each` with the values it binds.
///
/// Statements without placeholders run bare; every statement with placeholders gets the full
/// `params`. Supplying values that no statement consumes is an error.
fn run_script<F>(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    mut each: F,
) -> Result<WriteTally, ReactorError>
where
    F: FnMut(&mut Statement<'_>, &[Value]) -> Result<(), ReactorError>,
{
    let mut tally = WriteTally::default();
    let mut consumed = params.is_empty();
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next()? {
        let bound: &[Value] = if stmt.parameter_count() == 0 {
            &[]
        } else {
            consumed = true;
            params
        };
        let before = conn.total_changes();
        each(&mut stmt, bound)?;
        tally.record(conn, before);
    }
    if !consumed {
        return Err(rusqlite::Error::InvalidParameterCount(params.len(), 0).into());
    }
    Ok(tally)
}

/// Compile `sql` and return its parameter count.
///
/// # Errors
/// `ValidationError` unless `sql` holds exactly one statement.
pub(crate) fn single_statement_parameters(
    conn: &Connection,
    sql: &str,
) -> Result<usize, ReactorError> {
    let mut batch = Batch::new(conn, sql);
    let parameter_count = batch
        .next()?
        .ok_or_else(|| ReactorError::validation("query contains no SQL statement"))?
        .parameter_count();
    if !matches!(batch.next(), Ok(None)) {
        return Err(ReactorError::validation(
            "query must contain exactly one SQL statement",
        ));
    }
    Ok(parameter_count)
}

/// Run every statement in `sql`.
///
/// Rows and columns come from the last statement that returns columns. Write bookkeeping
/// covers the whole script.
pub(crate) fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    with_metadata: bool,
) -> Result<ResultSet, ReactorError> {
    let mut last: Option<ResultSet> = None;
    let tally = run_script(conn, sql, params, |stmt, bound| {
        let result_set = build_result_set(stmt, bound, with_metadata)?;
        if last.is_none() || stmt.column_count() > 0 {
            last = Some(result_set);
        }
        Ok(())
    })?;
    let mut result_set = last.unwrap_or_default();
    tally.apply(&mut result_set.rows_affected, &mut result_set.insert_id);
    Ok(result_set)
}

/// Run one already compiled statement and fill in write bookkeeping.
pub(crate) fn statement_outcome(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    params: &[Value],
) -> Result<ResultSet, ReactorError> {
    let before = conn.total_changes();
    let mut result_set = build_result_set(stmt, params, false)?;
    let mut tally = WriteTally::default();
    tally.record(conn, before);
    tally.apply(&mut result_set.rows_affected, &mut result_set.insert_id);
    Ok(result_set)
}

/// [`run_query`] with rows as plain value arrays.
pub(crate) fn build_raw_result(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<RawResult, ReactorError> {
    let mut result = RawResult::default();
    let mut have_rows = false;
    let tally = run_script(conn, sql, params, |stmt, bound| {
        let col_count = stmt.column_count();
        let param_refs = values_as_tosql(bound);
        let mut rows = stmt.query(&param_refs[..])?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            collected.push(extract_row(row, col_count)?);
        }
        if !have_rows || col_count > 0 {
            result.rows = collected;
            have_rows = true;
        }
        Ok(())
    })?;
    tally.apply(&mut result.rows_affected, &mut result.insert_id);
    Ok(result)
}

fn execute_statement(stmt: &mut Statement<'_>, bound: &[Value]) -> Result<(), ReactorError> {
    let param_refs = values_as_tosql(bound);
    let mut rows = stmt.query(&param_refs[..])?;
    while rows.next()?.is_some() {}
    Ok(())
}

/// Execute every command inside one exclusive transaction; any failure rolls all of it back.
pub(crate) fn execute_batch(
    conn: &mut Connection,
    commands: &[NativeBatchCommand],
) -> Result<BatchResult, ReactorError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    let mut rows_affected = 0usize;
    for command in commands {
        if command.params.is_empty() {
            let tally = run_script(&tx, &command.query, &[], execute_statement)?;
            rows_affected = rows_affected.saturating_add(tally.rows_affected);
            continue;
        }
        for set in &command.params {
            let tally = run_script(&tx, &command.query, set, execute_statement)?;
            rows_affected = rows_affected.saturating_add(tally.rows_affected);
        }
    }
    tx.commit()?;
    Ok(BatchResult { rows_affected })
}

/// Import a SQL file with one statement per line, inside one exclusive transaction.
pub(crate) fn import_sql_file(
    conn: &mut Connection,
    path: &Path,
) -> Result<FileLoadResult, ReactorError> {
    let reader = BufReader::new(File::open(path)?);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    let mut result = FileLoadResult::default();
    for line in reader.lines() {
        let line = line?;
        let statement = line.trim();
        if statement.is_empty() || statement.starts_with("--") {
            continue;
        }
        let tally = run_script(&tx, statement, &[], execute_statement)?;
        result.commands += 1;
        result.rows_affected = result.rows_affected.saturating_add(tally.rows_affected);
    }
    tx.commit()?;
    Ok(result)
}
