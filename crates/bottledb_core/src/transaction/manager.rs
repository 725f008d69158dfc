//! Transaction manager and commit pipeline.

use crate::blob::BlobKind;
use crate::error::{CoreError, CoreResult};
use crate::layout::Layout;
use crate::tracker::{Plan, WriteKind};
use crate::transaction::journal::{Journal, JournalEntry};
use crate::transaction::recovery::{discard, remove_path, roll_back, roll_forward};
use crate::transaction::state::TransactionState;
use crate::types::TransactionId;
use bottledb_storage::FileSystem;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// One write transaction.
///
/// Created by [`TransactionManager::begin`]; the store drives it through
/// locking and validation and hands it to [`TransactionManager::commit`].
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    token: String,
    state: TransactionState,
}

impl Transaction {
    /// The transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The staging token, unique across processes and transactions.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The current phase.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a transition the state
    /// machine does not allow.
    pub fn advance(&mut self, next: TransactionState) -> CoreResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} cannot move from {} to {next}",
                self.id, self.state
            )));
        }
        tracing::debug!(token = %self.token, from = %self.state, to = %next, "transaction state");
        self.state = next;
        Ok(())
    }
}

/// Hands out transactions and runs the commit pipeline.
///
/// The pipeline for a [`Plan`]:
///
/// 1. write every new record and attachment into `temp/<token>/`
/// 2. write the journal naming every production path that will change
/// 3. rename those production paths to backups
/// 4. rename the staged paths into production
/// 5. append `committed` to the journal
/// 6. drop backups, purge deleted records, remove the staging area
///
/// A failure in steps 3 to 5 rolls back through the journal before the
/// error is returned. Dropping an unfinished pipeline (a panic inside it)
/// does the same.
#[derive(Debug)]
pub struct TransactionManager {
    fs: Arc<dyn FileSystem>,
    layout: Layout,
    sync: bool,
    next_txid: AtomicU64,
}

impl TransactionManager {
    /// Creates a transaction manager.
    pub fn new(fs: Arc<dyn FileSystem>, layout: Layout, sync: bool) -> Self {
        Self {
            fs,
            layout,
            sync,
            next_txid: AtomicU64::new(1),
        }
    }

    /// Starts a transaction.
    pub fn begin(&self) -> Transaction {
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let nonce = Uuid::new_v4().simple().to_string();
        let token = format!("{}-{}-{}", process::id(), id.as_u64(), &nonce[..8]);
        Transaction {
            id,
            token,
            state: TransactionState::Created,
        }
    }

    /// Commits `plan`.
    ///
    /// The transaction must be [`TransactionState::Locked`]. On success it is
    /// [`TransactionState::Committed`], otherwise
    /// [`TransactionState::RolledBack`].
    ///
    /// # Errors
    ///
    /// Returns the first I/O error, or [`CoreError::RollbackFailed`] if
    /// undoing a partially applied commit failed as well. In that case the
    /// journal stays behind for recovery.
    pub(crate) fn commit(&self, txn: &mut Transaction, plan: &Plan) -> CoreResult<()> {
        let mut pipeline = Pipeline {
            fs: self.fs.as_ref(),
            layout: &self.layout,
            sync: self.sync,
            txn,
            journal: Journal::new(),
            settled: false,
        };
        match pipeline.run(plan) {
            Ok(()) => {
                pipeline.finalize();
                Ok(())
            }
            Err(cause) => Err(pipeline.abort(cause)),
        }
    }
}

struct Pipeline<'a> {
    fs: &'a dyn FileSystem,
    layout: &'a Layout,
    sync: bool,
    txn: &'a mut Transaction,
    journal: Journal,
    settled: bool,
}

impl Pipeline<'_> {
    fn token(&self) -> &str {
        &self.txn.token
    }

    fn run(&mut self, plan: &Plan) -> CoreResult<()> {
        self.stage(plan)?;
        self.write_journal(plan)?;
        self.txn.advance(TransactionState::Staged)?;
        self.backup()?;
        self.apply()?;
        self.journal.push(JournalEntry::Committed);
        self.journal.store(self.fs, self.layout, &self.txn.token, self.sync)?;
        self.txn.advance(TransactionState::Committed)
    }

    /// Writes new records and attachments into the staging area.
    fn stage(&self, plan: &Plan) -> CoreResult<()> {
        let token = self.token();
        for (reference, write) in &plan.writes {
            let rel = Layout::record_rel(&write.type_name, reference.id);
            self.fs
                .write(&self.layout.staged(token, &rel), write.text.as_bytes(), self.sync)?;
            if let WriteKind::Full(blobs) = &write.kind {
                for (kind, blob) in blobs {
                    let rel = Layout::blob_rel(*kind, reference.id, blob.name());
                    self.fs
                        .write(&self.layout.staged(token, &rel), blob.bytes(), self.sync)?;
                }
            }
        }
        tracing::debug!(%token, records = plan.writes.len(), "staged");
        Ok(())
    }

    /// Records every production path the commit replaces, creates or purges.
    fn write_journal(&mut self, plan: &Plan) -> CoreResult<()> {
        for (reference, write) in &plan.writes {
            let rel = Layout::record_rel(&write.type_name, reference.id);
            self.touch(rel.clone());
            match &write.kind {
                WriteKind::Full(blobs) => {
                    for kind in BlobKind::ALL {
                        let dir = Layout::blob_dir_rel(kind, reference.id);
                        if self.fs.exists(&self.layout.abs(&dir)) {
                            self.journal.push(JournalEntry::Backup(dir));
                        } else if blobs.iter().any(|(k, _)| *k == kind) {
                            self.journal.push(JournalEntry::Create(dir));
                        }
                    }
                }
                WriteKind::Delete => {
                    for kind in BlobKind::ALL {
                        let dir = Layout::blob_dir_rel(kind, reference.id);
                        if self.fs.exists(&self.layout.abs(&dir)) {
                            self.journal.push(JournalEntry::Backup(dir));
                        }
                    }
                    self.journal.push(JournalEntry::Purge(rel));
                }
                WriteKind::References => {}
            }
        }
        self.journal.store(self.fs, self.layout, &self.txn.token, self.sync)
    }

    fn touch(&mut self, rel: String) {
        if self.fs.exists(&self.layout.abs(&rel)) {
            self.journal.push(JournalEntry::Backup(rel));
        } else {
            self.journal.push(JournalEntry::Create(rel));
        }
    }

    fn backup(&mut self) -> CoreResult<()> {
        self.txn.advance(TransactionState::BackedUp)?;
        for rel in self.journal.backups() {
            self.fs.rename(&self.layout.abs(rel), &self.layout.backup_path(rel))?;
        }
        tracing::debug!(token = %self.token(), count = self.journal.backups().count(), "backed up");
        Ok(())
    }

    fn apply(&mut self) -> CoreResult<()> {
        self.txn.advance(TransactionState::Applied)?;
        let token = self.token();
        let mut parents = BTreeSet::<PathBuf>::new();
        for entry in self.journal.entries() {
            let (JournalEntry::Backup(rel) | JournalEntry::Create(rel)) = entry else {
                continue;
            };
            let staged = self.layout.staged(token, rel);
            if !self.fs.exists(&staged) {
                continue;
            }
            let production = self.layout.abs(rel);
            self.fs.rename(&staged, &production)?;
            if let Some(parent) = production.parent() {
                parents.insert(parent.to_path_buf());
            }
        }
        if self.sync {
            for parent in &parents {
                self.fs.sync_dir(parent)?;
            }
        }
        tracing::debug!(%token, "applied");
        Ok(())
    }

    /// Cleanup after the commit point. Failures leave garbage that the next
    /// recovery removes, never an inconsistent store.
    fn finalize(&mut self) {
        self.settled = true;
        let failures = roll_forward(self.fs, self.layout, &self.journal);
        if !failures.is_empty() {
            tracing::warn!(token = %self.token(), ?failures, "post-commit cleanup incomplete");
            return;
        }
        if let Err(e) = discard(self.fs, self.layout, self.token()) {
            tracing::warn!(token = %self.token(), error = %e, "staging area not removed");
        }
        tracing::debug!(token = %self.token(), "committed");
    }

    fn abort(&mut self, cause: CoreError) -> CoreError {
        self.settled = true;
        let state = self.txn.state;
        if state.is_destructive() {
            tracing::warn!(token = %self.token(), %state, error = %cause, "commit failed, rolling back");
            let failures = roll_back(self.fs, self.layout, &self.journal);
            self.txn.state = TransactionState::RolledBack;
            if !failures.is_empty() {
                tracing::error!(
                    token = %self.token(),
                    ?failures,
                    "rollback incomplete, journal kept for recovery"
                );
                return CoreError::RollbackFailed {
                    cause: Box::new(cause),
                    failures,
                };
            }
        } else {
            tracing::debug!(token = %self.token(), %state, error = %cause, "commit abandoned");
            self.txn.state = TransactionState::RolledBack;
        }
        if let Err(e) = discard(self.fs, self.layout, self.token()) {
            tracing::warn!(token = %self.token(), error = %e, "staging area not removed");
        }
        cause
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.txn.state == TransactionState::Committed {
            self.finalize();
        } else {
            let _ = self.abort(CoreError::transaction_aborted("commit interrupted"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;
    use crate::entity::{EntityId, Ref};
    use crate::tracker::RecordWrite;
    use bottledb_storage::{DirEntry, LockHandle, MemoryFileSystem, StorageError, StorageResult};
    use parking_lot::Mutex;
    use std::path::Path;

    /// Fails every rename whose destination matches `fail_to`.
    #[derive(Debug)]
    struct FailingRename {
        inner: MemoryFileSystem,
        fail_to: Mutex<Option<PathBuf>>,
        fail_restore: bool,
    }

    impl FileSystem for FailingRename {
        fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
            self.inner.read(path)
        }
        fn write(&self, path: &Path, data: &[u8], sync: bool) -> StorageResult<()> {
            self.inner.write(path, data, sync)
        }
        fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
            if self.fail_to.lock().as_deref() == Some(to) {
                if !self.fail_restore {
                    *self.fail_to.lock() = None;
                }
                return Err(StorageError::Injected(format!("rename to {}", to.display())));
            }
            self.inner.rename(from, to)
        }
        fn remove_file(&self, path: &Path) -> StorageResult<()> {
            self.inner.remove_file(path)
        }
        fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
            self.inner.remove_dir_all(path)
        }
        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }
        fn is_dir(&self, path: &Path) -> bool {
            self.inner.is_dir(path)
        }
        fn list(&self, dir: &Path) -> StorageResult<Vec<DirEntry>> {
            self.inner.list(dir)
        }
        fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
            self.inner.create_dir_all(path)
        }
        fn sync_dir(&self, path: &Path) -> StorageResult<()> {
            self.inner.sync_dir(path)
        }
        fn lock_exclusive(&self, path: &Path) -> StorageResult<Box<dyn LockHandle>> {
            self.inner.lock_exclusive(path)
        }
    }

    fn setup(fail_to: Option<PathBuf>, fail_restore: bool) -> (Arc<FailingRename>, TransactionManager) {
        let fs = Arc::new(FailingRename {
            inner: MemoryFileSystem::new(),
            fail_to: Mutex::new(fail_to),
            fail_restore,
        });
        let manager = TransactionManager::new(fs.clone(), Layout::new("/db"), true);
        (fs, manager)
    }

    fn write(kind: WriteKind, text: &str) -> RecordWrite {
        RecordWrite {
            type_name: "t.Doc".into(),
            text: text.into(),
            kind,
        }
    }

    fn locked(manager: &TransactionManager) -> Transaction {
        let mut txn = manager.begin();
        txn.advance(TransactionState::Locked).unwrap();
        txn
    }

    fn read(fs: &FailingRename, rel: &str) -> Option<String> {
        fs.read(&Layout::new("/db").abs(rel))
            .unwrap()
            .map(|b| String::from_utf8(b).unwrap())
    }

    #[test]
    fn tokens_are_unique() {
        let (_, manager) = setup(None, false);
        let a = manager.begin();
        let b = manager.begin();
        assert_ne!(a.token(), b.token());
        assert!(a.token().starts_with(&format!("{}-1-", process::id())));
        assert_eq!(b.id().as_u64(), 2);
    }

    #[test]
    fn commit_replaces_records_and_attachments() {
        let (fs, manager) = setup(None, false);
        let layout = Layout::new("/db");
        let kept = Ref::new(9, EntityId::new());
        let gone = Ref::new(9, EntityId::new());
        let kept_rel = Layout::record_rel("t.Doc", kept.id);
        let gone_rel = Layout::record_rel("t.Doc", gone.id);
        fs.write(&layout.abs(&kept_rel), b"v1", false).unwrap();
        fs.write(&layout.abs(&Layout::blob_rel(BlobKind::File, kept.id, "old")), b"o", false)
            .unwrap();
        fs.write(&layout.abs(&gone_rel), b"g", false).unwrap();
        fs.write(&layout.abs(&Layout::blob_rel(BlobKind::Image, gone.id, "h")), b"i", false)
            .unwrap();

        let mut plan = Plan::default();
        plan.writes.insert(
            kept,
            write(WriteKind::Full(vec![(BlobKind::File, Blob::new("new", "n"))]), "v2"),
        );
        plan.writes.insert(gone, write(WriteKind::Delete, "g~deleted"));
        plan.deletions.insert(gone);

        let mut txn = locked(&manager);
        manager.commit(&mut txn, &plan).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);

        assert_eq!(read(&fs, &kept_rel).as_deref(), Some("v2"));
        assert_eq!(read(&fs, &Layout::blob_rel(BlobKind::File, kept.id, "new")).as_deref(), Some("n"));
        assert!(read(&fs, &Layout::blob_rel(BlobKind::File, kept.id, "old")).is_none());
        assert!(read(&fs, &gone_rel).is_none());
        assert!(!fs.exists(&layout.abs(&Layout::blob_dir_rel(BlobKind::Image, gone.id))));
        assert!(fs.list(&layout.temp_root()).unwrap().is_empty());
        assert!(!fs.exists(&layout.backup_path(&kept_rel)));
    }

    #[test]
    fn failed_apply_rolls_back() {
        let layout = Layout::new("/db");
        let a = Ref::new(9, EntityId::new());
        let b = Ref::new(9, EntityId::new());
        let a_rel = Layout::record_rel("t.Doc", a.id);
        let b_rel = Layout::record_rel("t.Doc", b.id);
        let (fs, manager) = setup(Some(layout.abs(&b_rel)), false);
        fs.write(&layout.abs(&a_rel), b"a1", false).unwrap();
        fs.write(&layout.abs(&b_rel), b"b1", false).unwrap();

        let mut plan = Plan::default();
        plan.writes.insert(a, write(WriteKind::Full(Vec::new()), "a2"));
        plan.writes.insert(b, write(WriteKind::Full(Vec::new()), "b2"));

        let mut txn = locked(&manager);
        let err = manager.commit(&mut txn, &plan).unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::Injected(_))));
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert_eq!(read(&fs, &a_rel).as_deref(), Some("a1"));
        assert_eq!(read(&fs, &b_rel).as_deref(), Some("b1"));
        assert!(fs.list(&layout.temp_root()).unwrap().is_empty());
    }

    #[test]
    fn failed_rollback_keeps_journal() {
        let layout = Layout::new("/db");
        let a = Ref::new(9, EntityId::new());
        let a_rel = Layout::record_rel("t.Doc", a.id);
        // Applying onto production fails, and so does restoring the backup.
        let (fs, manager) = setup(Some(layout.abs(&a_rel)), true);
        fs.write(&layout.abs(&a_rel), b"a1", false).unwrap();

        let mut plan = Plan::default();
        plan.writes.insert(a, write(WriteKind::Full(Vec::new()), "a2"));

        let mut txn = locked(&manager);
        let err = manager.commit(&mut txn, &plan).unwrap_err();
        match err {
            CoreError::RollbackFailed { cause, failures } => {
                assert!(matches!(*cause, CoreError::Storage(StorageError::Injected(_))));
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(fs.exists(&layout.journal_path(txn.token())));
        assert_eq!(
            fs.read(&layout.backup_path(&a_rel)).unwrap().as_deref(),
            Some(&b"a1"[..])
        );
    }

    #[test]
    fn commit_requires_locked_transaction() {
        let (_, manager) = setup(None, false);
        let mut txn = manager.begin();
        let err = manager.commit(&mut txn, &Plan::default()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert_eq!(txn.state(), TransactionState::RolledBack);
    }
}
