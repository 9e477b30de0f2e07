use std::sync::{Arc, Mutex};

use rusqlite::hooks::Action;
use serde::Serialize;
use tracing::trace;

use crate::dispatch::{CallbackDispatcher, Gate};

use super::lock;
use super::registry::ReactiveRegistry;

/// Kind of row change reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RowOperation {
    Insert,
    Update,
    Delete,
    Unknown,
}

impl RowOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<Action> for RowOperation {
    fn from(action: Action) -> Self {
        match action {
            Action::SQLITE_INSERT => Self::Insert,
            Action::SQLITE_UPDATE => Self::Update,
            Action::SQLITE_DELETE => Self::Delete,
            _ => Self::Unknown,
        }
    }
}

/// One row write, as delivered to an update-hook callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateEvent {
    pub table: String,
    pub operation: RowOperation,
    pub row_id: i64,
}

pub type UpdateCallback = Arc<dyn Fn(UpdateEvent) + Send + Sync>;

/// Commit or rollback notification.
pub type TransactionCallback = Arc<dyn Fn() + Send + Sync>;

/// Receives every row write from the engine and hands it to two independent consumers:
/// the single external update callback, and the reactive registry fan-out.
///
/// Runs on whichever thread performed the write, while that thread holds the native handle.
#[derive(Clone)]
pub(crate) struct UpdateHookBridge {
    registry: Arc<Mutex<ReactiveRegistry>>,
    subscriber: Arc<Mutex<Option<UpdateCallback>>>,
    dispatcher: CallbackDispatcher,
    gate: Gate,
}

impl UpdateHookBridge {
    pub(crate) fn new(
        registry: Arc<Mutex<ReactiveRegistry>>,
        dispatcher: CallbackDispatcher,
        gate: Gate,
    ) -> Self {
        Self {
            registry,
            subscriber: Arc::new(Mutex::new(None)),
            dispatcher,
            gate,
        }
    }

    pub(crate) fn on_update(&self, event: UpdateEvent) {
        trace!(table = %event.table, op = event.operation.as_str(), row_id = event.row_id, "update hook");
        self.fan_out(&event);
        self.notify_subscriber(event);
    }

    /// Post the event to the external update callback, if one is set.
    pub(crate) fn notify_subscriber(&self, event: UpdateEvent) {
        let Some(callback) = lock(&self.subscriber).clone() else {
            return;
        };
        self.dispatcher
            .post_gated(&self.gate, move || callback(event));
    }

    /// Mark matching reactive queries pending. Returns how many became newly pending.
    pub(crate) fn fan_out(&self, event: &UpdateEvent) -> usize {
        let newly_pending = lock(&self.registry).on_write(&event.table, event.row_id);
        if newly_pending > 0 {
            trace!(table = %event.table, newly_pending, "reactive queries marked pending");
        }
        newly_pending
    }

    pub(crate) fn set_subscriber(&self, callback: Option<UpdateCallback>) {
        *lock(&self.subscriber) = callback;
    }

    /// Whether installing the native hook would have any effect.
    pub(crate) fn should_register(&self) -> bool {
        lock(&self.subscriber).is_some() || !lock(&self.registry).is_empty()
    }

    pub(crate) fn install(&self, conn: &rusqlite::Connection) {
        let bridge = self.clone();
        conn.update_hook(Some(
            move |action: Action, _db: &str, table: &str, row_id: i64| {
                bridge.on_update(UpdateEvent {
                    table: table.to_owned(),
                    operation: RowOperation::from(action),
                    row_id,
                });
            },
        ));
    }

    pub(crate) fn uninstall(conn: &rusqlite::Connection) {
        conn.update_hook(None::<fn(Action, &str, &str, i64)>);
    }
}
