//! CLI command implementations.

pub mod inspect;
pub mod recover;
pub mod verify;

use crate::error::CliError;
use bottledb_core::{Inspector, IntegrityIssue};
use bottledb_storage::{FileSystem, OsFileSystem};
use clap::ValueEnum;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// How a command prints its report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// One integrity problem, as printed.
#[derive(Debug, Serialize)]
pub struct IssueView {
    /// The record the problem is about.
    pub target: String,
    /// The other side of the reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// What is wrong.
    pub kind: String,
}

impl From<&IntegrityIssue> for IssueView {
    fn from(issue: &IntegrityIssue) -> Self {
        Self {
            target: issue.target.clone(),
            referrer: issue.referrer.clone(),
            kind: issue.kind.to_string(),
        }
    }
}

/// Opens a schema-less inspector on the store at `path`.
pub(crate) fn open_inspector(path: &Path) -> Result<Inspector, CliError> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
    if !fs.is_dir(path) {
        return Err(CliError::NoStore(path.to_path_buf()));
    }
    Ok(Inspector::open(fs, path)?)
}

/// Prints `value` as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
