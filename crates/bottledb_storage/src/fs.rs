//! File-system trait definition.

use crate::error::StorageResult;
use std::fmt;
use std::path::Path;

/// An entry returned by [`FileSystem::list`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    /// File or directory name (last path component).
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Handle for an acquired exclusive store lock.
///
/// The lock is held until the handle is dropped.
pub trait LockHandle: Send + Sync + fmt::Debug {}

/// The file-system operations BottleDB needs.
///
/// The file system is the only shared mutable resource of a store. All
/// production mutations go through [`FileSystem::rename`], which must replace
/// an existing destination file atomically.
///
/// # Invariants
///
/// - `write` creates missing parent directories
/// - `read` returns `Ok(None)` for an absent path
/// - `list` returns an empty list for an absent directory
/// - `remove_file` and `remove_dir_all` succeed on absent paths
/// - Implementations must be `Send + Sync` for concurrent transactions
///
/// # Implementors
///
/// - [`super::OsFileSystem`] - For persistent stores
/// - [`super::MemoryFileSystem`] - For tests
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Reads a whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path exists but cannot be read.
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>>;

    /// Creates or truncates a file and writes `data` into it.
    ///
    /// When `sync` is set the data is flushed to durable storage before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parents cannot be created.
    fn write(&self, path: &Path, data: &[u8], sync: bool) -> StorageResult<()>;

    /// Renames a file or directory, replacing a destination file.
    ///
    /// Missing parent directories of `to` are created.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` does not exist or the rename fails.
    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Removes a file. Absent files are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    fn remove_file(&self, path: &Path) -> StorageResult<()>;

    /// Removes a directory and everything below it. Absent paths are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be removed.
    fn remove_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Returns true if the path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if the path exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Lists the direct children of a directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    fn list(&self, dir: &Path) -> StorageResult<Vec<DirEntry>>;

    /// Creates a directory and all its parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn create_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Flushes directory metadata (creations, renames, deletions).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be synced.
    fn sync_dir(&self, path: &Path) -> StorageResult<()>;

    /// Acquires an exclusive, non-blocking lock on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Locked`] if the lock is already held.
    fn lock_exclusive(&self, path: &Path) -> StorageResult<Box<dyn LockHandle>>;
}
