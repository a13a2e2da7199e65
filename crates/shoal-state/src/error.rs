//! Error types for the state store.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// Result alias for state store operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors raised by the state store.
#[derive(Debug)]
pub enum StateError {
    /// The database file could not be opened or initialized.
    OpenFailed {
        /// Database location.
        path: PathBuf,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A stored status value was outside the known range.
    InvalidStatus {
        /// Stored value.
        value: i64,
        /// Row the value was read from.
        path: String,
    },
}

impl Display for StateError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed { path, .. } => {
                write!(formatter, "failed to open state database {}", path.display())
            }
            Self::QueryFailed { operation, .. } => {
                write!(formatter, "state operation '{operation}' failed")
            }
            Self::InvalidStatus { value, path } => {
                write!(formatter, "invalid status {value} stored for '{path}'")
            }
        }
    }
}

impl Error for StateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::OpenFailed { source, .. } | Self::QueryFailed { source, .. } => Some(source),
            Self::InvalidStatus { .. } => None,
        }
    }
}
