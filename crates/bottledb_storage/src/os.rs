//! OS-backed file system for persistent stores.

use crate::error::{StorageError, StorageResult};
use crate::fs::{DirEntry, FileSystem, LockHandle};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// A file system backed by the operating system.
///
/// # Durability
///
/// - `write(.., sync = true)` calls `File::sync_all()` before returning
/// - `sync_dir()` fsyncs the directory so renames and creations survive a
///   power loss (a no-op on platforms without directory fsync)
///
/// # Example
///
/// ```no_run
/// use bottledb_storage::{FileSystem, OsFileSystem};
/// use std::path::Path;
///
/// let fs = OsFileSystem::new();
/// fs.write(Path::new("store/a/b"), b"{0:hello}", true).unwrap();
/// assert!(fs.exists(Path::new("store/a/b")));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl OsFileSystem {
    /// Creates the OS file system.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Lock file handle; the advisory lock is released on drop.
#[derive(Debug)]
struct OsLock {
    file: File,
}

impl LockHandle for OsLock {}

impl Drop for OsLock {
    fn drop(&mut self) {
        // Closing the file releases the lock too.
        let _ = FileExt::unlock(&self.file);
    }
}

fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StorageError::at(parent, e))?;
        }
    }
    Ok(())
}

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::at(path, e)),
        }
    }

    fn write(&self, path: &Path, data: &[u8], sync: bool) -> StorageResult<()> {
        ensure_parent(path)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| StorageError::at(path, e))?;
        file.write_all(data).map_err(|e| StorageError::at(path, e))?;
        if sync {
            file.sync_all().map_err(|e| StorageError::at(path, e))?;
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        ensure_parent(to)?;
        fs::rename(from, to).map_err(|e| StorageError::at(from, e))
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::at(path, e)),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::at(path, e)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list(&self, dir: &Path) -> StorageResult<Vec<DirEntry>> {
        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::at(dir, e)),
        };

        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry.map_err(|e| StorageError::at(dir, e))?;
            let file_type = entry.file_type().map_err(|e| StorageError::at(dir, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        fs::create_dir_all(path).map_err(|e| StorageError::at(path, e))
    }

    #[cfg(unix)]
    fn sync_dir(&self, path: &Path) -> StorageResult<()> {
        match File::open(path) {
            Ok(dir) => dir.sync_all().map_err(|e| StorageError::at(path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::at(path, e)),
        }
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _path: &Path) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }

    fn lock_exclusive(&self, path: &Path) -> StorageResult<Box<dyn LockHandle>> {
        ensure_parent(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::at(path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        Ok(Box::new(OsLock { file }))
    }
}
