mod result_set;
mod row;

pub use result_set::{BatchResult, ColumnMetadata, FileLoadResult, RawResult, ResultSet};
pub use row::CustomDbRow;
