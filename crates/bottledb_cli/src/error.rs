//! CLI error type.

use bottledb_core::CoreError;
use bottledb_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the `bottledb` commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs `--path`.
    #[error("store path required for {0}")]
    MissingPath(&'static str),

    /// The directory holds no store.
    #[error("no store found at {}", .0.display())]
    NoStore(PathBuf),

    /// Verification found problems.
    #[error("verification failed: {0} issue(s)")]
    Inconsistent(usize),

    /// The store could not be read or recovered.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The store lock could not be taken.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output failed.
    #[error("json output: {0}")]
    Json(#[from] serde_json::Error),
}
