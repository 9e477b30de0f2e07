use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ReactorError;

pub const MEMORY_LOCATION: &str = ":memory:";

/// Extension loaded right after the database is opened. Needs the `load_extension` feature.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtensionSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub entry_point: Option<String>,
}

/// Options for opening a [`Connection`](crate::Connection).
///
/// `location` follows the same rules as
/// [`Connection::get_db_path`](crate::Connection::get_db_path): `":memory:"` opens an
/// in-memory database, an absolute path replaces `base_path`, and a relative path is appended
/// to it.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOptions {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub base_path: PathBuf,
    #[serde(default = "default_wal")]
    pub wal: bool,
    #[serde(default)]
    pub extensions: Vec<ExtensionSpec>,
}

fn default_wal() -> bool {
    true
}

impl OpenOptions {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            base_path: PathBuf::new(),
            wal: true,
            extensions: Vec::new(),
        }
    }

    /// Parse options from a JSON document.
    ///
    /// # Errors
    /// Returns `ReactorError::ConfigError` if the document does not describe valid options.
    pub fn from_json(json: &str) -> Result<Self, ReactorError> {
        let opts: Self = serde_json::from_str(json)
            .map_err(|e| ReactorError::ConfigError(format!("invalid open options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// # Errors
    /// Returns `ReactorError::ConfigError` if the database name is empty.
    pub fn validate(&self) -> Result<(), ReactorError> {
        if self.name.trim().is_empty() {
            return Err(ReactorError::ConfigError(
                "database name must not be empty".into(),
            ));
        }
        #[cfg(not(feature = "load_extension"))]
        if !self.extensions.is_empty() {
            return Err(ReactorError::ConfigError(
                "loading extensions requires the `load_extension` feature".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn directory(&self) -> String {
        resolve_directory(&self.base_path, self.location.as_deref())
    }

    /// Full path handed to SQLite.
    #[must_use]
    pub fn db_path(&self) -> String {
        resolve_db_path(&self.name, &self.directory())
    }
}

/// Fluent builder for [`OpenOptions`].
#[derive(Debug, Clone)]
pub struct OpenOptionsBuilder {
    opts: OpenOptions,
}

impl OpenOptionsBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            opts: OpenOptions::new(name),
        }
    }

    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.opts.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn in_memory(self) -> Self {
        self.location(MEMORY_LOCATION)
    }

    #[must_use]
    pub fn base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.opts.base_path = base_path.into();
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn extension(mut self, path: impl Into<PathBuf>, entry_point: Option<&str>) -> Self {
        self.opts.extensions.push(ExtensionSpec {
            path: path.into(),
            entry_point: entry_point.map(str::to_owned),
        });
        self
    }

    #[must_use]
    pub fn finish(self) -> OpenOptions {
        self.opts
    }
}

/// Resolve the directory a database lives in.
#[must_use]
pub fn resolve_directory(base_path: &Path, location: Option<&str>) -> String {
    match location {
        None | Some("") => base_path.to_string_lossy().into_owned(),
        Some(MEMORY_LOCATION) => MEMORY_LOCATION.to_owned(),
        Some(loc) if Path::new(loc).is_absolute() => loc.to_owned(),
        Some(loc) => base_path.join(loc).to_string_lossy().into_owned(),
    }
}

/// Join a database name onto a resolved directory.
#[must_use]
pub fn resolve_db_path(name: &str, directory: &str) -> String {
    if directory == MEMORY_LOCATION {
        return MEMORY_LOCATION.to_owned();
    }
    Path::new(directory).join(name).to_string_lossy().into_owned()
}
