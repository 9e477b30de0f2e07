//! Asynchronous, reactive access to a single-writer SQLite database.
//!
//! A [`Connection`] owns one SQLite handle and one worker thread. Operations queue onto the
//! worker and hand back a [`Completion`]; results are delivered on whichever thread pumps the
//! [`CallerLoop`] paired with the connection's [`CallbackDispatcher`]. Reactive queries
//! subscribe to row writes reported by SQLite's update hook and re-run on
//! [`Connection::flush_pending_reactive_queries`].

pub mod compress;
pub mod config;
mod connection;
pub mod dispatch;
pub mod error;
mod native;
pub mod prelude;
pub mod reactive;
pub mod results;
mod statement;
pub mod types;
mod worker;

pub use config::{ExtensionSpec, OpenOptions, OpenOptionsBuilder};
pub use connection::{
    AttachOptions, BatchCommand, Connection, ReactiveQueryOptions, Subscription,
};
pub use dispatch::{CallbackDispatcher, CallerLoop, Completion, CompletionState, callback_channel};
pub use error::{ErrorKind, ReactorError};
pub use reactive::{
    QueryId, ReactiveCallback, RowOperation, TableRowDiscriminator, TransactionCallback,
    UpdateCallback, UpdateEvent,
};
pub use results::{
    BatchResult, ColumnMetadata, CustomDbRow, FileLoadResult, RawResult, ResultSet,
};
pub use statement::PreparedStatement;
pub use types::RowValues;
pub use worker::{WorkTask, WorkerPool};
