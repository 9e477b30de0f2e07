//! The connection handle: one SQLite database, one worker queue, one invalidation flag.
//!
//! Every asynchronous operation validates its arguments on the calling thread, queues a task
//! on the connection's worker, and returns a [`Completion`]. The task re-checks the
//! invalidation flag after the native call and stays silent if the connection was closed in
//! the meantime.

mod admin;
mod execute;
mod reactive;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

use crate::config::{MEMORY_LOCATION, OpenOptions, resolve_db_path};
use crate::dispatch::{CallbackDispatcher, Completion, Gate, completion};
use crate::error::ReactorError;
use crate::native::NativeHandle;
use crate::reactive::hook::UpdateHookBridge;
use crate::reactive::lock;
use crate::reactive::registry::ReactiveRegistry;
use crate::worker::WorkerPool;

pub use admin::AttachOptions;
pub use execute::BatchCommand;
pub use reactive::{ReactiveQueryOptions, Subscription};

/// State shared between the handle, its worker tasks, prepared statements and subscriptions.
///
/// Only [`Connection`] holds a strong reference outside of a running task; everything else
/// goes through a [`Weak`].
pub(crate) struct Shared {
    name: String,
    options: OpenOptions,
    native: NativeHandle,
    pool: WorkerPool,
    dispatcher: CallbackDispatcher,
    gate: Gate,
    registry: Arc<Mutex<ReactiveRegistry>>,
    bridge: UpdateHookBridge,
    update_hook_registered: AtomicBool,
}

impl Shared {
    pub(crate) fn native(&self) -> &NativeHandle {
        &self.native
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        self.gate.is_closed()
    }

    pub(crate) fn ensure_valid(&self) -> Result<(), ReactorError> {
        if self.gate.is_closed() {
            return Err(ReactorError::state(format!(
                "connection to {} has been closed",
                self.name
            )));
        }
        Ok(())
    }

    /// Queue `work` on the worker and hand back its completion.
    ///
    /// The task holds only a weak reference. If the connection is gone, or is invalidated by
    /// the time `work` returns, the resolver is dropped and the completion is abandoned.
    pub(crate) fn spawn_task<T, F>(
        self: &Arc<Self>,
        op: &'static str,
        work: F,
    ) -> Result<Completion<T>, ReactorError>
    where
        T: Send + 'static,
        F: FnOnce(&Shared) -> Result<T, ReactorError> + Send + 'static,
    {
        self.ensure_valid()?;
        let (resolver, completion) = completion(&self.dispatcher, &self.gate);
        let weak: Weak<Shared> = Arc::downgrade(self);
        self.pool.submit(Box::new(move || {
            let Some(core) = weak.upgrade() else {
                return;
            };
            if core.gate.is_closed() {
                return;
            }
            let result = work(&core);
            if core.gate.is_closed() {
                trace!(db = %core.name, op, "dropping result of invalidated connection");
                return;
            }
            resolver.settle(result);
        }))?;
        Ok(completion)
    }

    /// Bring the native update hook in line with whether anyone is listening.
    ///
    /// Must be called with the native handle held, which `conn` proves.
    fn sync_update_hook(&self, conn: &rusqlite::Connection) {
        let wanted = self.bridge.should_register();
        if self.update_hook_registered.load(Ordering::Acquire) == wanted {
            return;
        }
        if wanted {
            self.bridge.install(conn);
        } else {
            UpdateHookBridge::uninstall(conn);
        }
        self.update_hook_registered.store(wanted, Ordering::Release);
        debug!(db = %self.name, registered = wanted, "update hook registration changed");
    }

    fn invalidate(&self) -> bool {
        if !self.gate.close() {
            return false;
        }
        debug!(db = %self.name, "invalidating connection");
        self.pool.restart();
        // Waits for a task that is already running to let go of the handle.
        self.native.release();
        self.update_hook_registered.store(false, Ordering::Release);
        self.bridge.set_subscriber(None);
        lock(&self.registry).clear();
        true
    }
}

/// Handle to one open database.
///
/// Dropping the handle invalidates it, exactly like [`Connection::close`].
pub struct Connection {
    core: Arc<Shared>,
}

impl Connection {
    /// Open the database described by `options`. Results and callbacks are delivered through
    /// `dispatcher`.
    ///
    /// The target directory is created if it does not exist. WAL mode and configured
    /// extensions are applied before the handle is returned.
    ///
    /// # Errors
    /// Returns `ConfigError` for invalid options, `Io` if the directory cannot be created,
    /// `SqliteError` if SQLite refuses to open the file, and `ConnectionError` if the worker
    /// thread cannot be spawned.
    pub fn open(options: OpenOptions, dispatcher: CallbackDispatcher) -> Result<Self, ReactorError> {
        options.validate()?;
        let directory = options.directory();
        if directory != MEMORY_LOCATION && !directory.is_empty() {
            fs::create_dir_all(&directory)?;
        }
        let path = resolve_db_path(&options.name, &directory);

        let conn = rusqlite::Connection::open(&path)?;
        if options.wal && path != MEMORY_LOCATION {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        #[cfg(feature = "load_extension")]
        for extension in &options.extensions {
            crate::native::load_extension(&conn, &extension.path, extension.entry_point.as_deref())?;
        }

        let gate = Gate::new();
        let registry = Arc::new(Mutex::new(ReactiveRegistry::new()));
        let bridge = UpdateHookBridge::new(Arc::clone(&registry), dispatcher.clone(), gate.clone());
        let pool = WorkerPool::new(options.name.clone())?;
        debug!(db = %options.name, path = %path, "opened connection");

        Ok(Self {
            core: Arc::new(Shared {
                name: options.name.clone(),
                options,
                native: NativeHandle::new(conn),
                pool,
                dispatcher,
                gate,
                registry,
                bridge,
                update_hook_registered: AtomicBool::new(false),
            }),
        })
    }

    /// Database name this connection was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Permanently invalidate the connection.
    ///
    /// The first call closes the gate, drops every queued task, releases the native handle
    /// and clears the reactive registry. Any result that completes afterwards is never
    /// delivered. Later calls do nothing and return `false`.
    pub fn invalidate(&self) -> bool {
        self.core.invalidate()
    }

    /// Close the database. Idempotent.
    pub fn close(&self) {
        self.invalidate();
    }

    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.core.is_invalidated()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.core.invalidate();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.core.name)
            .field("invalidated", &self.core.is_invalidated())
            .field("worker", &self.core.pool)
            .finish_non_exhaustive()
    }
}
