//! Recover command implementation.

use super::{print_json, OutputFormat};
use crate::error::CliError;
use bottledb_core::{recover, Layout, RecoveryReport};
use bottledb_storage::{FileSystem, OsFileSystem};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Recovery result.
#[derive(Debug, Serialize)]
pub struct RecoverResult {
    /// Transactions that were undone.
    pub rolled_back: Vec<String>,
    /// Committed transactions whose cleanup was finished.
    pub rolled_forward: Vec<String>,
    /// Staging directories removed.
    pub temp_dirs_removed: usize,
}

impl From<RecoveryReport> for RecoverResult {
    fn from(report: RecoveryReport) -> Self {
        Self {
            rolled_back: report.rolled_back,
            rolled_forward: report.rolled_forward,
            temp_dirs_removed: report.temp_dirs_removed,
        }
    }
}

/// Runs the recover command.
///
/// Takes the store lock first, so it fails while an application has the
/// store open.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let fs = OsFileSystem::new();
    let layout = Layout::new(path);
    if !fs.exists(&layout.dictionary_path()) {
        return Err(CliError::NoStore(path.to_path_buf()));
    }

    let _lock = fs.lock_exclusive(&layout.lock_path())?;
    info!(path = %path.display(), "recovering store");
    let result = RecoverResult::from(recover(&fs, &layout)?);

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            print_text_output(&result);
            Ok(())
        }
    }
}

fn print_text_output(result: &RecoverResult) {
    if result.rolled_back.is_empty()
        && result.rolled_forward.is_empty()
        && result.temp_dirs_removed == 0
    {
        println!("Nothing to recover");
        return;
    }
    for token in &result.rolled_back {
        println!("rolled back   {token}");
    }
    for token in &result.rolled_forward {
        println!("rolled forward {token}");
    }
    if result.temp_dirs_removed > 0 {
        println!("removed {} staging director(ies)", result.temp_dirs_removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_is_not_a_store() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), OutputFormat::Text).unwrap_err();
        assert!(matches!(err, CliError::NoStore(_)));
        assert!(!dir.path().join("LOCK").exists());
    }

    #[test]
    fn clean_store_has_nothing_to_recover() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFileSystem::new();
        let layout = Layout::new(dir.path());
        fs.write(&layout.dictionary_path(), b"", false).unwrap();

        run(dir.path(), OutputFormat::Json).unwrap();
        let report = recover(&fs, &layout).unwrap();
        assert!(report.is_clean());
    }
}
