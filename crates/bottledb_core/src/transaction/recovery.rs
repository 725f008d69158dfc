//! Journal replay.
//!
//! A journal without `committed` is rolled back: created paths are removed
//! and every backup that was taken is renamed over its production path. A
//! committed journal is rolled forward: backups are dropped and purged
//! records removed. The same routines serve failed in-process commits and
//! leftovers found on open.

use crate::error::{CoreError, CoreResult};
use crate::layout::{Layout, JOURNAL_SUFFIX};
use crate::transaction::journal::{Journal, JournalEntry, JOURNAL_SCRATCH_SUFFIX};
use bottledb_storage::{FileSystem, StorageResult};
use std::collections::BTreeSet;
use std::path::Path;

/// What [`recover`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tokens of interrupted transactions that were undone.
    pub rolled_back: Vec<String>,
    /// Tokens of committed transactions whose cleanup was completed.
    pub rolled_forward: Vec<String>,
    /// Staging directories removed.
    pub temp_dirs_removed: usize,
}

impl RecoveryReport {
    /// Whether there was nothing to recover.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rolled_back.is_empty() && self.rolled_forward.is_empty() && self.temp_dirs_removed == 0
    }
}

/// Removes a file or a directory tree.
pub(crate) fn remove_path(fs: &dyn FileSystem, path: &Path) -> StorageResult<()> {
    if fs.is_dir(path) {
        fs.remove_dir_all(path)
    } else {
        fs.remove_file(path)
    }
}

/// Undoes the destructive steps recorded in `journal`, newest first.
///
/// Returns one message per step that failed; every step is attempted.
pub(crate) fn roll_back(fs: &dyn FileSystem, layout: &Layout, journal: &Journal) -> Vec<String> {
    let mut failures = Vec::new();
    for entry in journal.entries().iter().rev() {
        match entry {
            JournalEntry::Create(rel) => {
                if let Err(e) = remove_path(fs, &layout.abs(rel)) {
                    failures.push(format!("remove {rel}: {e}"));
                }
            }
            JournalEntry::Backup(rel) => {
                let backup = layout.backup_path(rel);
                if !fs.exists(&backup) {
                    continue;
                }
                let production = layout.abs(rel);
                let restored = remove_path(fs, &production).and_then(|()| fs.rename(&backup, &production));
                if let Err(e) = restored {
                    failures.push(format!("restore {rel}: {e}"));
                }
            }
            JournalEntry::Purge(_) | JournalEntry::Committed => {}
        }
    }
    failures
}

/// Completes the cleanup of a committed journal.
///
/// Returns one message per step that failed; every step is attempted.
pub(crate) fn roll_forward(fs: &dyn FileSystem, layout: &Layout, journal: &Journal) -> Vec<String> {
    let mut failures = Vec::new();
    for rel in journal.backups() {
        if let Err(e) = remove_path(fs, &layout.backup_path(rel)) {
            failures.push(format!("drop backup {rel}: {e}"));
        }
    }
    for rel in journal.purges() {
        if let Err(e) = fs.remove_file(&layout.abs(rel)) {
            failures.push(format!("purge {rel}: {e}"));
        }
    }
    failures
}

/// Removes the staging directory and journal of `token`.
pub(crate) fn discard(fs: &dyn FileSystem, layout: &Layout, token: &str) -> StorageResult<()> {
    fs.remove_dir_all(&layout.temp_dir(token))?;
    fs.remove_file(&layout.journal_path(token))
}

/// Replays every journal left in the staging root and removes orphaned
/// staging directories.
///
/// Must run while no transaction is in flight.
///
/// # Errors
///
/// Returns [`CoreError::RollbackFailed`] if a journal could not be
/// replayed completely; its journal is kept so a later run can retry.
pub fn recover(fs: &dyn FileSystem, layout: &Layout) -> CoreResult<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut failures = Vec::new();
    let entries = fs.list(&layout.temp_root())?;
    let mut journaled = BTreeSet::new();

    for entry in entries.iter().filter(|e| !e.is_dir) {
        if let Some(scratch) = entry.name.strip_suffix(JOURNAL_SCRATCH_SUFFIX) {
            // A scratch journal never became the journal of record.
            tracing::debug!(file = %scratch, "removing scratch journal");
            fs.remove_file(&layout.temp_root().join(&entry.name))?;
            continue;
        }
        let Some(token) = entry.name.strip_suffix(JOURNAL_SUFFIX) else {
            continue;
        };
        journaled.insert(token.to_string());
        let Some(journal) = Journal::load(fs, layout, token)? else {
            continue;
        };

        let (outcome, steps) = if journal.is_committed() {
            ("rolled forward", roll_forward(fs, layout, &journal))
        } else {
            ("rolled back", roll_back(fs, layout, &journal))
        };
        if !steps.is_empty() {
            tracing::error!(%token, failures = ?steps, "recovery incomplete");
            failures.extend(steps);
            continue;
        }
        discard(fs, layout, token)?;
        tracing::info!(%token, outcome, "recovered interrupted transaction");
        if journal.is_committed() {
            report.rolled_forward.push(token.to_string());
        } else {
            report.rolled_back.push(token.to_string());
        }
    }

    for entry in entries.iter().filter(|e| e.is_dir) {
        if journaled.contains(&entry.name) {
            continue;
        }
        fs.remove_dir_all(&layout.temp_dir(&entry.name))?;
        report.temp_dirs_removed += 1;
    }

    if !failures.is_empty() {
        return Err(CoreError::RollbackFailed {
            cause: Box::new(CoreError::transaction_aborted("interrupted transaction")),
            failures,
        });
    }
    if !report.is_clean() {
        tracing::info!(
            rolled_back = report.rolled_back.len(),
            rolled_forward = report.rolled_forward.len(),
            temp_dirs = report.temp_dirs_removed,
            "recovery finished"
        );
    }
    Ok(report)
}
