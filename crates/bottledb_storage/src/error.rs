//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An I/O error occurred on a specific path.
    #[error("I/O error on {path}: {source}")]
    PathIo {
        /// The path the operation touched.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// The path does not exist.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// The destination of a rename already exists and cannot be replaced.
    #[error("destination already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Another handle holds the exclusive store lock.
    #[error("store locked: {0} is held by another process")]
    Locked(PathBuf),

    /// A fault was injected by a test harness.
    #[error("injected fault: {0}")]
    Injected(String),
}

impl StorageError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound(path);
        }
        Self::PathIo { path, source }
    }

    /// Returns true if this error means the path was absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) | Self::PathIo { source: e, .. } => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
