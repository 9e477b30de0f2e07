use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid state: {0}")]
    StateError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Coarse classification of a [`ReactorError`].
///
/// Validation and state errors are always reported synchronously by the call that detected
/// them; execution errors are the only kind that travel through a rejected
/// [`Completion`](crate::dispatch::Completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Execution,
    State,
    Connection,
    Config,
}

impl ReactorError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::StateError(_) => ErrorKind::State,
            Self::SqliteError(_) | Self::Io(_) | Self::ExecutionError(_) => ErrorKind::Execution,
            Self::ConnectionError(_) => ErrorKind::Connection,
            Self::ConfigError(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::StateError(message.into())
    }
}
