use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::row::{CustomDbRow, column_index};
use crate::types::RowValues;

/// Column description attached to results produced by
/// [`Connection::execute_with_host_objects`](crate::Connection::execute_with_host_objects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Declared type from the table schema; `None` for expressions.
    pub declared_type: Option<String>,
    pub index: usize,
}

/// Rows returned by a query together with write bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// Rows changed by the statement (0 for read-only statements)
    pub rows_affected: usize,
    /// Rowid of the last insert, when the statement wrote anything
    pub insert_id: Option<i64>,
    column_names: Option<Arc<Vec<String>>>,
    column_index_cache: Option<Arc<HashMap<String, usize>>>,
    metadata: Option<Arc<Vec<ColumnMetadata>>>,
}

impl ResultSet {
    /// Create an empty result set with preallocated row capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            ..ResultSet::default()
        }
    }

    /// Set the column names for this result set (to be shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index_cache = Some(Arc::new(column_index(&column_names)));
        self.column_names = Some(column_names);
    }

    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    pub(crate) fn set_metadata(&mut self, metadata: Vec<ColumnMetadata>) {
        self.metadata = Some(Arc::new(metadata));
    }

    /// Column metadata, only present for host-object style results.
    #[must_use]
    pub fn metadata(&self) -> Option<&[ColumnMetadata]> {
        self.metadata.as_deref().map(Vec::as_slice)
    }

    /// Append a row. Rows pushed before column names are set are ignored.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        let (Some(column_names), Some(cache)) = (&self.column_names, &self.column_index_cache)
        else {
            return;
        };
        self.results.push(CustomDbRow {
            column_names: Arc::clone(column_names),
            rows: row_values,
            column_index_cache: Arc::clone(cache),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Result of [`Connection::execute_raw`](crate::Connection::execute_raw): rows as plain value
/// arrays, without column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawResult {
    pub rows: Vec<Vec<RowValues>>,
    pub rows_affected: usize,
    pub insert_id: Option<i64>,
}

/// Result of [`Connection::execute_batch`](crate::Connection::execute_batch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub rows_affected: usize,
}

/// Result of [`Connection::load_file`](crate::Connection::load_file).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileLoadResult {
    pub rows_affected: usize,
    pub commands: usize,
}
