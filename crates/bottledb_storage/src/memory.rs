//! In-memory file system for testing.

use crate::error::{StorageError, StorageResult};
use crate::fs::{DirEntry, FileSystem, LockHandle};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

/// An in-memory file system.
///
/// This file system keeps every file in a sorted map and is suitable for:
/// - Unit tests
/// - Ephemeral stores that don't need persistence
///
/// Renames are atomic with respect to other callers because the whole tree
/// sits behind one lock.
///
/// # Example
///
/// ```rust
/// use bottledb_storage::{FileSystem, MemoryFileSystem};
/// use std::path::Path;
///
/// let fs = MemoryFileSystem::new();
/// fs.write(Path::new("/db/a"), b"{0:x}", false).unwrap();
/// fs.rename(Path::new("/db/a"), Path::new("/db/b")).unwrap();
/// assert_eq!(fs.read(Path::new("/db/b")).unwrap(), Some(b"{0:x}".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
    locks: Arc<Mutex<HashSet<PathBuf>>>,
}

#[derive(Debug)]
struct MemoryLock {
    path: PathBuf,
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LockHandle for MemoryLock {}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.held.lock().remove(&self.path);
    }
}

impl MemoryFileSystem {
    /// Creates an empty in-memory file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every file path currently stored, sorted.
    ///
    /// Useful for asserting on the exact on-disk state in tests.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.nodes
            .read()
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn insert_parents(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) -> StorageResult<()> {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            match nodes.get(dir) {
                Some(Node::Dir) => break,
                Some(Node::File(_)) => return Err(StorageError::AlreadyExists(dir.to_path_buf())),
                None => {
                    nodes.insert(dir.to_path_buf(), Node::Dir);
                }
            }
            current = dir.parent();
        }
        Ok(())
    }

    fn has_children(nodes: &BTreeMap<PathBuf, Node>, dir: &Path) -> bool {
        nodes
            .range(dir.to_path_buf()..)
            .skip(1)
            .take_while(|(path, _)| path.starts_with(dir))
            .next()
            .is_some()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match self.nodes.read().get(path) {
            Some(Node::File(data)) => Ok(Some(data.clone())),
            Some(Node::Dir) => Err(StorageError::AlreadyExists(path.to_path_buf())),
            None => Ok(None),
        }
    }

    fn write(&self, path: &Path, data: &[u8], _sync: bool) -> StorageResult<()> {
        let mut nodes = self.nodes.write();
        if matches!(nodes.get(path), Some(Node::Dir)) {
            return Err(StorageError::AlreadyExists(path.to_path_buf()));
        }
        Self::insert_parents(&mut nodes, path)?;
        nodes.insert(path.to_path_buf(), Node::File(data.to_vec()));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        let mut nodes = self.nodes.write();
        let source = nodes
            .get(from)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(from.to_path_buf()))?;

        match (&source, nodes.get(to)) {
            (_, Some(Node::Dir)) if Self::has_children(&nodes, to) => {
                return Err(StorageError::AlreadyExists(to.to_path_buf()));
            }
            (Node::File(_), Some(Node::Dir)) | (Node::Dir, Some(Node::File(_))) => {
                return Err(StorageError::AlreadyExists(to.to_path_buf()));
            }
            _ => {}
        }

        Self::insert_parents(&mut nodes, to)?;

        let moved: Vec<(PathBuf, Node)> = nodes
            .range(from.to_path_buf()..)
            .take_while(|(path, _)| path.starts_with(from))
            .map(|(path, node)| (path.clone(), node.clone()))
            .collect();

        for (path, _) in &moved {
            nodes.remove(path);
        }
        for (path, node) in moved {
            let suffix = path.strip_prefix(from).unwrap_or(Path::new(""));
            let target = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            nodes.insert(target, node);
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        let mut nodes = self.nodes.write();
        if let Some(Node::File(_)) = nodes.get(path) {
            nodes.remove(path);
        }
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        let mut nodes = self.nodes.write();
        let doomed: Vec<PathBuf> = nodes
            .range(path.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(p, _)| p.clone())
            .collect();
        for p in doomed {
            nodes.remove(&p);
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.nodes.read().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.nodes.read().get(path), Some(Node::Dir))
    }

    fn list(&self, dir: &Path) -> StorageResult<Vec<DirEntry>> {
        let nodes = self.nodes.read();
        let mut entries: Vec<DirEntry> = nodes
            .range(dir.to_path_buf()..)
            .take_while(|(path, _)| path.starts_with(dir))
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, node)| {
                path.file_name().map(|name| DirEntry {
                    name: name.to_string_lossy().into_owned(),
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(StorageError::AlreadyExists(path.to_path_buf())),
            None => {
                Self::insert_parents(&mut nodes, path)?;
                nodes.insert(path.to_path_buf(), Node::Dir);
                Ok(())
            }
        }
    }

    fn sync_dir(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }

    fn lock_exclusive(&self, path: &Path) -> StorageResult<Box<dyn LockHandle>> {
        let mut held = self.locks.lock();
        if !held.insert(path.to_path_buf()) {
            return Err(StorageError::Locked(path.to_path_buf()));
        }
        Ok(Box::new(MemoryLock {
            path: path.to_path_buf(),
            held: Arc::clone(&self.locks),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn write_and_read() {
        let fs = MemoryFileSystem::new();
        fs.write(&p("/db/shop/Order/1"), b"{0:a}", false).unwrap();

        assert_eq!(fs.read(&p("/db/shop/Order/1")).unwrap(), Some(b"{0:a}".to_vec()));
        assert!(fs.is_dir(&p("/db/shop/Order")));
        assert!(fs.is_dir(&p("/db")));
        assert!(fs.read(&p("/db/missing")).unwrap().is_none());
    }

    #[test]
    fn list_direct_children_only() {
        let fs = MemoryFileSystem::new();
        fs.write(&p("/db/a/x"), b"", false).unwrap();
        fs.write(&p("/db/a/y/z"), b"", false).unwrap();
        fs.write(&p("/db/b"), b"", false).unwrap();

        let names: Vec<_> = fs
            .list(&p("/db/a"))
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_dir))
            .collect();
        assert_eq!(names, vec![("x".to_string(), false), ("y".to_string(), true)]);
    }

    #[test]
    fn rename_file_replaces() {
        let fs = MemoryFileSystem::new();
        fs.write(&p("/t/a"), b"new", false).unwrap();
        fs.write(&p("/p/a"), b"old", false).unwrap();

        fs.rename(&p("/t/a"), &p("/p/a")).unwrap();

        assert_eq!(fs.read(&p("/p/a")).unwrap(), Some(b"new".to_vec()));
        assert!(!fs.exists(&p("/t/a")));
    }

    #[test]
    fn rename_directory_moves_subtree() {
        let fs = MemoryFileSystem::new();
        fs.write(&p("/t/files/1/doc.txt"), b"hi", false).unwrap();
        fs.write(&p("/t/files/1/more/deep"), b"x", false).unwrap();
        fs.write(&p("/t/files/10/other"), b"y", false).unwrap();

        fs.rename(&p("/t/files/1"), &p("/db/files/1")).unwrap();

        assert_eq!(fs.read(&p("/db/files/1/doc.txt")).unwrap(), Some(b"hi".to_vec()));
        assert_eq!(fs.read(&p("/db/files/1/more/deep")).unwrap(), Some(b"x".to_vec()));
        assert!(!fs.exists(&p("/t/files/1")));
        // Sibling with a shared string prefix is untouched.
        assert!(fs.exists(&p("/t/files/10/other")));
    }

    #[test]
    fn rename_onto_non_empty_dir_fails() {
        let fs = MemoryFileSystem::new();
        fs.write(&p("/a/x"), b"", false).unwrap();
        fs.write(&p("/b/y"), b"", false).unwrap();

        assert!(matches!(
            fs.rename(&p("/a"), &p("/b")),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn remove_dir_all_removes_subtree() {
        let fs = MemoryFileSystem::new();
        fs.write(&p("/db/temp/tok/a"), b"", false).unwrap();
        fs.write(&p("/db/temp/tok2/a"), b"", false).unwrap();

        fs.remove_dir_all(&p("/db/temp/tok")).unwrap();

        assert!(!fs.exists(&p("/db/temp/tok")));
        assert!(fs.exists(&p("/db/temp/tok2/a")));
        assert_eq!(fs.files(), vec![p("/db/temp/tok2/a")]);
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let fs = MemoryFileSystem::new();
        let handle = fs.lock_exclusive(&p("/db/LOCK")).unwrap();
        assert!(fs.lock_exclusive(&p("/db/LOCK")).is_err());
        drop(handle);
        assert!(fs.lock_exclusive(&p("/db/LOCK")).is_ok());
    }
}
