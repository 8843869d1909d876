//! Error taxonomy for the backup engine.
//!
//! Fatal conditions travel as [`Error`]. Per-statement replay failures and
//! version mismatches are plain data (`ReplayError`, `CompatibilityWarning`)
//! and never become an `Err`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Result type alias using siteport-backup's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input shape, disallowed file type or size
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Disk or permission failure
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Missing or corrupt archive entry, or an unreadable container
    #[error("Invalid archive: {0}")]
    ArchiveFormat(String),

    /// Structured store driver failure outside best-effort replay
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] siteport_core::Error),

    /// Unrecoverable condition that aborts a running job
    #[error("{0}")]
    Fatal(String),

    /// Cancellation observed at a checkpoint
    #[error("Cancelled")]
    Cancelled,
}

/// Serializable classification of an [`Error`], recorded on failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Io,
    ArchiveFormat,
    Store,
    Config,
    Fatal,
    Cancelled,
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an archive format error
    pub fn archive_format(message: impl Into<String>) -> Self {
        Self::ArchiveFormat(message.into())
    }

    /// Create a fatal job error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Wrap an IO error with what was being attempted
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an IO error that concerns a specific path
    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("Failed to {} {}", action, path.display()), source)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Io { .. } => ErrorKind::Io,
            Self::ArchiveFormat(_) => ErrorKind::ArchiveFormat,
            Self::Store(_) => ErrorKind::Store,
            Self::Config(_) => ErrorKind::Config,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Attach context to `std::io::Result` values
pub trait IoContext<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| Error::io(context(), source))
    }
}
