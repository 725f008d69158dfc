//! Fault injection for commit and recovery testing.
//!
//! [`FaultyFileSystem`] wraps another file system and fails chosen
//! mutations. A fault either fails a single call, after which the store
//! carries on and rolls back, or simulates a crash: from the failing call
//! on, every mutation fails until [`FaultyFileSystem::revive`] is called.
//! Whatever is on disk at that moment is what a killed process leaves
//! behind, and reopening the store must recover it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bottledb_testkit::{CrashPoint, FaultyFileSystem, TestStore};
//!
//! let fs = FaultyFileSystem::memory("/db");
//! let mut store = TestStore::on(fs.clone(), "/db", shop_schema(), Config::default());
//! fs.crash_at(CrashPoint::Apply);
//! assert!(store.save(&order).is_err());
//! fs.revive();
//! store.reopen();
//! ```

use bottledb_storage::{
    DirEntry, FileSystem, LockHandle, MemoryFileSystem, StorageError, StorageResult,
};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A mutating file-system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// `write`.
    Write,
    /// `rename`.
    Rename,
    /// `remove_file` or `remove_dir_all`.
    Remove,
    /// `create_dir_all`.
    CreateDir,
    /// `sync_dir`.
    SyncDir,
}

/// Points of the commit pipeline at which a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Writing a record or attachment into the staging area.
    Staging,
    /// Writing the journal, before anything in production changed.
    Journal,
    /// Renaming a production path to its backup.
    Backup,
    /// Renaming a staged path into production.
    Apply,
    /// Writing the `committed` mark.
    CommitMark,
    /// Dropping backups after the commit point.
    Cleanup,
}

impl CrashPoint {
    /// Every point, in pipeline order.
    pub const ALL: [Self; 6] = [
        Self::Staging,
        Self::Journal,
        Self::Backup,
        Self::Apply,
        Self::CommitMark,
        Self::Cleanup,
    ];

    /// Whether a commit interrupted here is durable.
    pub fn is_after_commit(self) -> bool {
        self == Self::Cleanup
    }

    /// Whether a commit reaches this point when it only creates records.
    pub fn needs_existing_records(self) -> bool {
        matches!(self, Self::Backup | Self::Cleanup)
    }

    fn matches(self, call: &Call<'_>) -> bool {
        let name = call.file_name();
        match self {
            Self::Staging => {
                call.op == FaultOp::Write && call.in_staging_dir() && !name.ends_with(".tmp")
            }
            Self::Journal | Self::CommitMark => {
                call.op == FaultOp::Write && name.ends_with(".journal.tmp")
            }
            Self::Backup => {
                call.op == FaultOp::Rename && call.to.is_some_and(|to| file_name(to).ends_with(".bak"))
            }
            Self::Apply => call.op == FaultOp::Rename && call.in_staging_dir(),
            Self::Cleanup => call.op == FaultOp::Remove && name.ends_with(".bak"),
        }
    }

    /// How many matching calls to let through first.
    fn skip(self) -> usize {
        match self {
            Self::CommitMark => 1,
            _ => 0,
        }
    }
}

/// One intercepted call. Paths are relative to the store root.
struct Call<'a> {
    op: FaultOp,
    path: &'a Path,
    to: Option<&'a Path>,
}

impl Call<'_> {
    fn file_name(&self) -> String {
        file_name(self.path)
    }

    /// Inside `temp/<token>/`, as opposed to `temp/` itself.
    fn in_staging_dir(&self) -> bool {
        let mut components = self.path.components();
        components.next().is_some_and(|c| c.as_os_str() == "temp") && components.count() >= 2
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// How an armed fault behaves once it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Fail the matching call only.
    Once,
    /// Fail the matching call and every mutation after it.
    Crash,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    point: CrashPoint,
    mode: FaultMode,
    skip: usize,
}

#[derive(Debug, Default)]
struct FaultState {
    armed: Vec<Armed>,
    crashed: bool,
    injected: usize,
}

/// A file system that fails chosen mutations.
pub struct FaultyFileSystem {
    inner: Arc<dyn FileSystem>,
    root: PathBuf,
    state: Mutex<FaultState>,
}

impl fmt::Debug for FaultyFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FaultyFileSystem")
            .field("root", &self.root)
            .field("crashed", &state.crashed)
            .field("injected", &state.injected)
            .finish_non_exhaustive()
    }
}

impl FaultyFileSystem {
    /// Wraps `inner`; paths are matched relative to the store at `root`.
    pub fn new(inner: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            root: root.into(),
            state: Mutex::new(FaultState::default()),
        })
    }

    /// Wraps a fresh in-memory file system.
    pub fn memory(root: impl Into<PathBuf>) -> Arc<Self> {
        Self::new(Arc::new(MemoryFileSystem::new()), root)
    }

    /// The wrapped file system.
    pub fn inner(&self) -> &Arc<dyn FileSystem> {
        &self.inner
    }

    /// Fails the next call at `point`; later calls succeed.
    pub fn fail_at(&self, point: CrashPoint) {
        self.arm(point, FaultMode::Once);
    }

    /// Simulates a crash at the next call at `point`.
    pub fn crash_at(&self, point: CrashPoint) {
        self.arm(point, FaultMode::Crash);
    }

    fn arm(&self, point: CrashPoint, mode: FaultMode) {
        self.state.lock().armed.push(Armed {
            point,
            mode,
            skip: point.skip(),
        });
    }

    /// Ends a simulated crash and disarms every pending fault.
    pub fn revive(&self) {
        let mut state = self.state.lock();
        state.crashed = false;
        state.armed.clear();
    }

    /// Whether a crash is in progress.
    pub fn has_crashed(&self) -> bool {
        self.state.lock().crashed
    }

    /// Number of calls failed so far.
    pub fn injected(&self) -> usize {
        self.state.lock().injected
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    fn check(&self, op: FaultOp, path: &Path, to: Option<&Path>) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.crashed {
            state.injected += 1;
            return Err(StorageError::Injected(format!("crashed before {op:?} {}", path.display())));
        }
        let rel_path = self.relative(path);
        let rel_to = to.map(|to| self.relative(to));
        let call = Call {
            op,
            path: &rel_path,
            to: rel_to.as_deref(),
        };

        let Some(index) = state.armed.iter().position(|a| a.point.matches(&call)) else {
            return Ok(());
        };
        let armed = &mut state.armed[index];
        if armed.skip > 0 {
            armed.skip -= 1;
            return Ok(());
        }
        let fired = state.armed.remove(index);
        state.injected += 1;
        if fired.mode == FaultMode::Crash {
            state.crashed = true;
        }
        Err(StorageError::Injected(format!("{:?} at {}", fired.point, rel_path.display())))
    }
}

impl FileSystem for FaultyFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read(path)
    }

    fn write(&self, path: &Path, data: &[u8], sync: bool) -> StorageResult<()> {
        self.check(FaultOp::Write, path, None)?;
        self.inner.write(path, data, sync)
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        self.check(FaultOp::Rename, from, Some(to))?;
        self.inner.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        self.check(FaultOp::Remove, path, None)?;
        self.inner.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        self.check(FaultOp::Remove, path, None)?;
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
        self.check(FaultOp::CreateDir, path, None)?;
        self.inner.create_dir_all(path)
    }

    fn sync_dir(&self, path: &Path) -> StorageResult<()> {
        self.check(FaultOp::SyncDir, path, None)?;
        self.inner.sync_dir(path)
    }

    fn lock_exclusive(&self, path: &Path) -> StorageResult<Box<dyn LockHandle>> {
        self.inner.lock_exclusive(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn once_fails_a_single_call() {
        let fs = FaultyFileSystem::memory("/db");
        fs.fail_at(CrashPoint::Staging);
        // The journal scratch file is not a staged record.
        fs.write(&p("/db/temp/t.journal.tmp"), b"j", false).unwrap();
        assert!(fs.write(&p("/db/temp/t/a/B/1"), b"x", false).is_err());
        fs.write(&p("/db/temp/t/a/B/1"), b"x", false).unwrap();
        assert_eq!(fs.injected(), 1);
        assert!(!fs.has_crashed());
    }

    #[test]
    fn crash_fails_everything_until_revived() {
        let fs = FaultyFileSystem::memory("/db");
        fs.write(&p("/db/a/B/1"), b"v1", false).unwrap();
        fs.crash_at(CrashPoint::Backup);
        assert!(fs.rename(&p("/db/a/B/1"), &p("/db/a/B/1.bak")).is_err());
        assert!(fs.has_crashed());
        assert!(fs.write(&p("/db/other"), b"x", false).is_err());
        assert_eq!(fs.read(&p("/db/a/B/1")).unwrap(), Some(b"v1".to_vec()));

        fs.revive();
        fs.write(&p("/db/other"), b"x", false).unwrap();
        assert_eq!(fs.injected(), 2);
    }

    #[test]
    fn commit_mark_skips_the_first_journal_write() {
        let fs = FaultyFileSystem::memory("/db");
        fs.fail_at(CrashPoint::CommitMark);
        fs.write(&p("/db/temp/t.journal.tmp"), b"1", false).unwrap();
        assert!(fs.write(&p("/db/temp/t.journal.tmp"), b"2", false).is_err());
    }

    #[test]
    fn apply_matches_staged_renames_only() {
        let fs = FaultyFileSystem::memory("/db");
        fs.write(&p("/db/temp/t.journal.tmp"), b"j", false).unwrap();
        fs.write(&p("/db/temp/t/a/B/1"), b"x", false).unwrap();
        fs.fail_at(CrashPoint::Apply);
        fs.rename(&p("/db/temp/t.journal.tmp"), &p("/db/temp/t.journal")).unwrap();
        assert!(fs.rename(&p("/db/temp/t/a/B/1"), &p("/db/a/B/1")).is_err());
    }
}
