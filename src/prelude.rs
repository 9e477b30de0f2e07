//! Convenient imports for common functionality.

pub use crate::config::{OpenOptions, OpenOptionsBuilder};
pub use crate::connection::{
    AttachOptions, BatchCommand, Connection, ReactiveQueryOptions, Subscription,
};
pub use crate::dispatch::{CallbackDispatcher, CallerLoop, Completion, CompletionState, callback_channel};
pub use crate::error::ReactorError;
pub use crate::reactive::{RowOperation, TableRowDiscriminator, UpdateEvent};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::statement::PreparedStatement;
pub use crate::types::RowValues;
