//! Record sources backed by the store tree.

use crate::blob::BlobKind;
use crate::codec::RecordSource;
use crate::dictionary::TypeRegistry;
use crate::entity::{EntityId, Ref};
use crate::error::{CoreError, CoreResult};
use crate::layout::{backup_of, Layout};
use crate::lock::{LockKey, LockManager};
use bottledb_codec::StoredRecord;
use bottledb_storage::FileSystem;
use std::path::Path;

/// Parses the record stored at `path`.
pub(crate) fn parse_record(path: &Path, bytes: Vec<u8>) -> CoreResult<StoredRecord> {
    let location = path.display().to_string();
    let text = String::from_utf8(bytes).map_err(|_| CoreError::corrupt(&location, "not UTF-8"))?;
    StoredRecord::parse(&text).map_err(|e| CoreError::corrupt(location, e.to_string()))
}

/// Reads production files without locking.
///
/// A path whose production file is missing is read from its backup: while
/// a commit is between its backup and apply renames, the backup still holds
/// the committed version.
#[derive(Clone, Copy)]
pub(crate) struct TreeReader<'a> {
    pub fs: &'a dyn FileSystem,
    pub layout: &'a Layout,
    pub registry: &'a TypeRegistry,
}

impl TreeReader<'_> {
    fn read_either(&self, production: &Path, backup: &Path) -> CoreResult<Option<(Vec<u8>, bool)>> {
        if let Some(bytes) = self.fs.read(production)? {
            return Ok(Some((bytes, false)));
        }
        Ok(self.fs.read(backup)?.map(|bytes| (bytes, true)))
    }

    /// The raw text of a record, soft-deleted or not.
    pub fn record_text(&self, reference: Ref) -> CoreResult<Option<String>> {
        let type_name = self.registry.type_of(reference.tag)?;
        let rel = Layout::record_rel(&type_name, reference.id);
        let path = self.layout.abs(&rel);
        let Some((bytes, _)) = self.read_either(&path, &self.layout.backup_path(&rel))? else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| CoreError::corrupt(path.display().to_string(), "not UTF-8"))
    }
}

impl RecordSource for TreeReader<'_> {
    fn read_record(&self, reference: Ref) -> CoreResult<Option<StoredRecord>> {
        let type_name = self.registry.type_of(reference.tag)?;
        let rel = Layout::record_rel(&type_name, reference.id);
        let path = self.layout.abs(&rel);
        match self.read_either(&path, &self.layout.backup_path(&rel))? {
            Some((bytes, _)) => parse_record(&path, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_blob(&self, kind: BlobKind, owner: EntityId, name: &str) -> CoreResult<Option<Vec<u8>>> {
        let dir = Layout::blob_dir_rel(kind, owner);
        let production = self.layout.abs(&dir).join(name);
        let backup = backup_of(&self.layout.abs(&dir)).join(name);
        Ok(self.read_either(&production, &backup)?.map(|(bytes, from_backup)| {
            if from_backup {
                tracing::trace!(%owner, name, "blob read from backup");
            }
            bytes
        }))
    }
}

/// Reads each record under its identity read lock.
///
/// The lock is held for the read alone, so a reader never waits on more
/// than one lock at a time and sees every record either before or after
/// any commit that touches it.
pub(crate) struct LockingReader<'a> {
    pub tree: TreeReader<'a>,
    pub locks: &'a LockManager,
}

impl LockingReader<'_> {
    pub fn record_text(&self, reference: Ref) -> CoreResult<Option<String>> {
        let _guard = self.locks.lock_read(LockKey::Entity(reference))?;
        self.tree.record_text(reference)
    }
}

impl RecordSource for LockingReader<'_> {
    fn read_record(&self, reference: Ref) -> CoreResult<Option<StoredRecord>> {
        let _guard = self.locks.lock_read(LockKey::Entity(reference))?;
        self.tree.read_record(reference)
    }

    fn read_blob(&self, kind: BlobKind, owner: EntityId, name: &str) -> CoreResult<Option<Vec<u8>>> {
        self.tree.read_blob(kind, owner, name)
    }
}
