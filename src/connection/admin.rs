use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::compress;
use crate::config::{MEMORY_LOCATION, resolve_db_path, resolve_directory};
use crate::dispatch::Completion;
use crate::error::ReactorError;

use super::Connection;

/// Arguments of [`Connection::attach`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachOptions {
    pub secondary_db_file_name: String,
    pub alias: String,
    /// Directory of the secondary database, resolved against the connection's base path.
    #[serde(default)]
    pub location: Option<String>,
}

impl Connection {
    /// Attach another database file under `alias`.
    ///
    /// # Errors
    /// `ValidationError` for an empty file name or alias, `StateError` on an invalidated
    /// connection, `SqliteError` if SQLite rejects the attach.
    pub fn attach(&self, options: &AttachOptions) -> Result<(), ReactorError> {
        if options.secondary_db_file_name.trim().is_empty() {
            return Err(ReactorError::validation(
                "secondary database file name must not be empty",
            ));
        }
        if options.alias.trim().is_empty() {
            return Err(ReactorError::validation("attach alias must not be empty"));
        }
        self.core.ensure_valid()?;
        let directory = resolve_directory(&self.core.options.base_path, options.location.as_deref());
        let path = resolve_db_path(&options.secondary_db_file_name, &directory);
        self.core.native.with(|conn| {
            conn.execute("ATTACH DATABASE ?1 AS ?2", [&path, &options.alias])?;
            Ok(())
        })?;
        debug!(db = %self.core.name, alias = %options.alias, path = %path, "attached database");
        Ok(())
    }

    /// Detach the database attached under `alias`.
    ///
    /// # Errors
    /// `ValidationError` for an empty alias, `StateError` on an invalidated connection,
    /// `SqliteError` if nothing is attached under `alias`.
    pub fn detach(&self, alias: &str) -> Result<(), ReactorError> {
        if alias.trim().is_empty() {
            return Err(ReactorError::validation("detach alias must not be empty"));
        }
        self.core.ensure_valid()?;
        self.core.native.with(|conn| {
            conn.execute("DETACH DATABASE ?1", [alias])?;
            Ok(())
        })
    }

    /// Load a SQLite extension from `path`, optionally through a named entry point.
    ///
    /// # Errors
    /// `ValidationError` for an empty path, `StateError` on an invalidated connection,
    /// `SqliteError` if the extension fails to load.
    #[cfg(feature = "load_extension")]
    pub fn load_extension(
        &self,
        path: impl AsRef<Path>,
        entry_point: Option<&str>,
    ) -> Result<(), ReactorError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ReactorError::validation("extension path must not be empty"));
        }
        self.core.ensure_valid()?;
        self.core
            .native
            .with(|conn| crate::native::load_extension(conn, path, entry_point))
    }

    /// Path of this connection's database file for `location`, or for the location it was
    /// opened with when `None`.
    #[must_use]
    pub fn get_db_path(&self, location: Option<&str>) -> String {
        let options = &self.core.options;
        let location = location.or(options.location.as_deref());
        resolve_db_path(&options.name, &resolve_directory(&options.base_path, location))
    }

    /// Invalidate the connection and remove its database file along with the `-wal` and
    /// `-shm` companions.
    ///
    /// Works on an already closed connection. In-memory databases have nothing to remove.
    ///
    /// # Errors
    /// `ExecutionError` if the database file does not exist, `Io` if removal fails.
    pub fn delete(&self, location: Option<&str>) -> Result<(), ReactorError> {
        let path = self.get_db_path(location);
        self.invalidate();
        if path == MEMORY_LOCATION {
            return Ok(());
        }
        if !Path::new(&path).exists() {
            return Err(ReactorError::ExecutionError(format!(
                "database file not found: {path}"
            )));
        }
        fs::remove_file(&path)?;
        for suffix in ["-wal", "-shm"] {
            match fs::remove_file(format!("{path}{suffix}")) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
                _ => {}
            }
        }
        debug!(db = %self.core.name, path = %path, "deleted database");
        Ok(())
    }

    /// Gzip `path` on the worker. Resolves to the path of the compressed copy.
    ///
    /// # Errors
    /// Synchronously returns `ValidationError` for an empty path and `StateError` on an
    /// invalidated connection. Compression failures reject the completion.
    pub fn compress_file(&self, path: impl Into<PathBuf>) -> Result<Completion<String>, ReactorError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ReactorError::validation("file path must not be empty"));
        }
        self.core.spawn_task("compress_file", move |_| {
            compress::compress_file(&path).map(|target| target.to_string_lossy().into_owned())
        })
    }
}
