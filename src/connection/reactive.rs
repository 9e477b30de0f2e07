use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::dispatch::Completion;
use crate::error::ReactorError;
use crate::native;
use crate::reactive::lock;
use crate::reactive::{
    QueryId, ReactiveCallback, TableRowDiscriminator, TransactionCallback, UpdateCallback,
};
use crate::types::{RowValues, convert_params};

use super::{Connection, Shared};

/// Arguments of [`Connection::reactive_execute`].
pub struct ReactiveQueryOptions {
    pub query: String,
    pub arguments: Vec<RowValues>,
    /// Writes that mark the query pending. An empty list never fires.
    pub fire_on: Vec<TableRowDiscriminator>,
    pub callback: ReactiveCallback,
}

impl std::fmt::Debug for ReactiveQueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveQueryOptions")
            .field("query", &self.query)
            .field("arguments", &self.arguments)
            .field("fire_on", &self.fire_on)
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`Connection::reactive_execute`].
///
/// Dropping it does not unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    id: QueryId,
    core: Weak<Shared>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Remove the query from the registry and the pending set.
    ///
    /// Returns `false` if it was already removed or the connection is gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        core.native
            .with(|conn| {
                let removed = lock(&core.registry).unsubscribe(self.id);
                core.sync_update_hook(conn);
                Ok(removed)
            })
            .unwrap_or(false)
    }
}

impl Connection {
    /// Set or clear (`None`) the single update callback.
    ///
    /// The native update hook is registered whenever this callback is set or any reactive
    /// query is subscribed.
    ///
    /// # Errors
    /// Returns `StateError` on an invalidated connection.
    pub fn update_hook(&self, callback: Option<UpdateCallback>) -> Result<(), ReactorError> {
        self.core.ensure_valid()?;
        self.core.native.with(|conn| {
            self.core.bridge.set_subscriber(callback);
            self.core.sync_update_hook(conn);
            Ok(())
        })
    }

    /// Set or clear (`None`) the commit callback. It never vetoes the commit.
    ///
    /// # Errors
    /// Returns `StateError` on an invalidated connection.
    pub fn commit_hook(&self, callback: Option<TransactionCallback>) -> Result<(), ReactorError> {
        self.core.ensure_valid()?;
        let hook = callback.map(|callback| {
            let dispatcher = self.core.dispatcher.clone();
            let gate = self.core.gate.clone();
            move || {
                let callback = Arc::clone(&callback);
                dispatcher.post_gated(&gate, move || callback());
                false
            }
        });
        self.core.native.with(|conn| {
            debug!(db = %self.core.name, registered = hook.is_some(), "commit hook changed");
            conn.commit_hook(hook);
            Ok(())
        })
    }

    /// Set or clear (`None`) the rollback callback.
    ///
    /// # Errors
    /// Returns `StateError` on an invalidated connection.
    pub fn rollback_hook(&self, callback: Option<TransactionCallback>) -> Result<(), ReactorError> {
        self.core.ensure_valid()?;
        let hook = callback.map(|callback| {
            let dispatcher = self.core.dispatcher.clone();
            let gate = self.core.gate.clone();
            move || {
                let callback = Arc::clone(&callback);
                dispatcher.post_gated(&gate, move || callback());
            }
        });
        self.core.native.with(|conn| {
            debug!(db = %self.core.name, registered = hook.is_some(), "rollback hook changed");
            conn.rollback_hook(hook);
            Ok(())
        })
    }

    /// Subscribe a query that is re-run by [`Connection::flush_pending_reactive_queries`]
    /// after any write matching `fire_on`.
    ///
    /// The statement is compiled immediately so mistakes surface here rather than on flush.
    ///
    /// # Errors
    /// `ValidationError` for an empty query, more than one statement or a wrong argument
    /// count. `StateError` on an invalidated connection, `SqliteError` if the statement does
    /// not compile.
    pub fn reactive_execute(&self, options: ReactiveQueryOptions) -> Result<Subscription, ReactorError> {
        let ReactiveQueryOptions {
            query,
            arguments,
            fire_on,
            callback,
        } = options;
        if query.trim().is_empty() {
            return Err(ReactorError::validation("reactive query must not be empty"));
        }
        self.core.ensure_valid()?;
        let params = convert_params(&arguments);

        let id = self.core.native.with(|conn| {
            let expected = native::single_statement_parameters(conn, &query)?;
            if expected != params.len() {
                return Err(ReactorError::validation(format!(
                    "reactive query expects {expected} arguments, got {}",
                    params.len()
                )));
            }
            let id = lock(&self.core.registry).subscribe(Arc::new(query), params, fire_on, callback);
            self.core.sync_update_hook(conn);
            Ok(id)
        })?;
        debug!(db = %self.core.name, query_id = id, "reactive query subscribed");

        Ok(Subscription {
            id,
            core: Arc::downgrade(&self.core),
        })
    }

    /// Re-run every pending reactive query, post each one's callback, then resolve.
    ///
    /// The pending set is taken when the task starts; writes after that point stay pending
    /// for the next flush. If the connection is invalidated mid-flush the remaining queries
    /// are skipped and the completion is abandoned.
    ///
    /// # Errors
    /// Returns `StateError` on an invalidated connection.
    pub fn flush_pending_reactive_queries(&self) -> Result<Completion<()>, ReactorError> {
        self.core.spawn_task("flush_pending_reactive_queries", |core| {
            let queries = lock(&core.registry).drain_pending();
            trace!(db = %core.name, count = queries.len(), "flushing reactive queries");
            for query in queries {
                if core.gate.is_closed() {
                    return Err(ReactorError::state("connection invalidated during flush"));
                }
                if !lock(&core.registry).contains(query.id) {
                    continue;
                }
                let result = core.native.with(|conn| {
                    let mut stmt = conn.prepare_cached(&query.sql)?;
                    native::statement_outcome(conn, &mut stmt, &query.params)
                });
                let callback = Arc::clone(&query.callback);
                core.dispatcher
                    .post_gated(&core.gate, move || callback(result));
            }
            Ok(())
        })
    }

    #[must_use]
    pub fn is_update_hook_registered(&self) -> bool {
        self.core
            .update_hook_registered
            .load(std::sync::atomic::Ordering::Acquire)
    }

    #[must_use]
    pub fn reactive_query_count(&self) -> usize {
        lock(&self.core.registry).len()
    }

    #[must_use]
    pub fn pending_reactive_query_count(&self) -> usize {
        lock(&self.core.registry).pending_len()
    }

    #[must_use]
    pub fn is_reactive_query_pending(&self, id: QueryId) -> bool {
        lock(&self.core.registry).is_pending(id)
    }
}
