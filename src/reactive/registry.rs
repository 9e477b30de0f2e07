//! Subscribed reactive queries and the set of those awaiting re-execution.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::ReactorError;
use crate::results::ResultSet;

/// Stable identity assigned at subscription time.
pub type QueryId = u64;

/// Callback receiving each re-execution of a reactive query, on the caller thread.
pub type ReactiveCallback = Arc<dyn Fn(Result<ResultSet, ReactorError>) + Send + Sync>;

/// Which writes should trigger a reactive query.
///
/// An empty id set matches every row of `table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRowDiscriminator {
    pub table: String,
    pub ids: HashSet<i64>,
}

impl TableRowDiscriminator {
    /// Match any row of `table`.
    #[must_use]
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ids: HashSet::new(),
        }
    }

    /// Restrict the match to the given row ids.
    #[must_use]
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ids.extend(ids);
        self
    }

    #[must_use]
    pub fn matches(&self, table: &str, row_id: i64) -> bool {
        self.table == table && (self.ids.is_empty() || self.ids.contains(&row_id))
    }
}

/// A subscribed query: the statement to re-run, what triggers it, and who to tell.
pub(crate) struct ReactiveQuery {
    pub(crate) id: QueryId,
    pub(crate) sql: Arc<String>,
    pub(crate) params: Vec<rusqlite::types::Value>,
    pub(crate) discriminators: Vec<TableRowDiscriminator>,
    pub(crate) callback: ReactiveCallback,
}

impl ReactiveQuery {
    fn matches(&self, table: &str, row_id: i64) -> bool {
        self.discriminators.iter().any(|d| d.matches(table, row_id))
    }
}

impl std::fmt::Debug for ReactiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveQuery")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("discriminators", &self.discriminators)
            .finish_non_exhaustive()
    }
}

/// Registry of subscribed queries plus the pending set.
///
/// Queries are indexed by the tables their discriminators name, so a write only looks at
/// queries that could possibly match it.
#[derive(Debug, Default)]
pub(crate) struct ReactiveRegistry {
    queries: HashMap<QueryId, Arc<ReactiveQuery>>,
    by_table: HashMap<String, BTreeSet<QueryId>>,
    pending: BTreeSet<QueryId>,
    next_id: QueryId,
}

impl ReactiveRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub(crate) fn subscribe(
        &mut self,
        sql: Arc<String>,
        params: Vec<rusqlite::types::Value>,
        discriminators: Vec<TableRowDiscriminator>,
        callback: ReactiveCallback,
    ) -> QueryId {
        let id = self.next_id;
        self.next_id += 1;

        for discriminator in &discriminators {
            self.by_table
                .entry(discriminator.table.clone())
                .or_default()
                .insert(id);
        }
        self.queries.insert(
            id,
            Arc::new(ReactiveQuery {
                id,
                sql,
                params,
                discriminators,
                callback,
            }),
        );
        id
    }

    /// Remove a query from the registry and the pending set. Returns false if it was not
    /// subscribed.
    pub(crate) fn unsubscribe(&mut self, id: QueryId) -> bool {
        let Some(query) = self.queries.remove(&id) else {
            return false;
        };
        for discriminator in &query.discriminators {
            if let Some(ids) = self.by_table.get_mut(&discriminator.table) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_table.remove(&discriminator.table);
                }
            }
        }
        self.pending.remove(&id);
        true
    }

    /// Mark every query matching a write to `(table, row_id)` pending. Returns how many
    /// queries became pending that were not already.
    pub(crate) fn on_write(&mut self, table: &str, row_id: i64) -> usize {
        let Some(candidates) = self.by_table.get(table) else {
            return 0;
        };
        let mut newly_pending = 0;
        for id in candidates {
            let Some(query) = self.queries.get(id) else {
                continue;
            };
            if query.matches(table, row_id) && self.pending.insert(*id) {
                newly_pending += 1;
            }
        }
        newly_pending
    }

    /// Take the current pending set, leaving it empty. Returned in subscription order.
    pub(crate) fn drain_pending(&mut self) -> Vec<Arc<ReactiveQuery>> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|id| self.queries.get(&id).cloned())
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.queries.clear();
        self.by_table.clear();
        self.pending.clear();
    }

    pub(crate) fn contains(&self, id: QueryId) -> bool {
        self.queries.contains_key(&id)
    }

    pub(crate) fn is_pending(&self, id: QueryId) -> bool {
        self.pending.contains(&id)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.queries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
