//! Store directory layout.
//!
//! ```text
//! <root>/
//! ├─ LOCK                      # Advisory lock for single-process access
//! ├─ dictionary                # Type registry, one `<index>=<name>` per line
//! ├─ <type-path>/<id>          # One record per entity
//! ├─ <type-path>/<id>.bak      # Backup while a commit is in flight
//! ├─ files/<id>/<name>         # File attachments of entity <id>
//! ├─ imgs/<id>/<sha256>        # Image attachments of entity <id>
//! └─ temp/
//!    ├─ <token>/…              # Staging area of one transaction
//!    └─ <token>.journal        # Its journal
//! ```
//!
//! Store-relative paths are `/`-separated strings so they can be written to
//! journals verbatim.

use crate::blob::BlobKind;
use crate::entity::EntityId;
use crate::schema::type_path;
use std::path::{Path, PathBuf};

/// Lock file name.
pub const LOCK_FILE: &str = "LOCK";
/// Dictionary file name.
pub const DICTIONARY_FILE: &str = "dictionary";
/// Temporary file for atomic dictionary writes.
pub const DICTIONARY_TEMP: &str = "dictionary.tmp";
/// Staging directory.
pub const TEMP_DIR: &str = "temp";
/// File attachment directory.
pub const FILES_DIR: &str = "files";
/// Image attachment directory.
pub const IMAGES_DIR: &str = "imgs";
/// Suffix appended to a production path while it is backed up.
pub const BACKUP_SUFFIX: &str = ".bak";
/// Suffix of transaction journals inside the staging directory.
pub const JOURNAL_SUFFIX: &str = ".journal";

/// Appends the backup suffix to a path.
#[must_use]
pub fn backup_of(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Path arithmetic for one store root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Creates the layout for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a store-relative path below `base`.
    fn join(base: &Path, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|s| !s.is_empty())
            .fold(base.to_path_buf(), |path, segment| path.join(segment))
    }

    /// Absolute production path of a store-relative path.
    #[must_use]
    pub fn abs(&self, rel: &str) -> PathBuf {
        Self::join(&self.root, rel)
    }

    /// Store-relative path of an entity record.
    #[must_use]
    pub fn record_rel(type_name: &str, id: EntityId) -> String {
        format!("{}/{id}", type_path(type_name))
    }

    /// Directory holding the records of a type.
    #[must_use]
    pub fn type_dir(&self, type_name: &str) -> PathBuf {
        self.abs(&type_path(type_name))
    }

    /// Store-relative attachment directory of an entity.
    #[must_use]
    pub fn blob_dir_rel(kind: BlobKind, id: EntityId) -> String {
        match kind {
            BlobKind::File => format!("{FILES_DIR}/{id}"),
            BlobKind::Image => format!("{IMAGES_DIR}/{id}"),
        }
    }

    /// Store-relative path of one attachment.
    #[must_use]
    pub fn blob_rel(kind: BlobKind, id: EntityId, name: &str) -> String {
        format!("{}/{name}", Self::blob_dir_rel(kind, id))
    }

    /// The staging root.
    #[must_use]
    pub fn temp_root(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    /// The staging area of one transaction.
    #[must_use]
    pub fn temp_dir(&self, token: &str) -> PathBuf {
        self.temp_root().join(token)
    }

    /// Where a transaction stages a store-relative path.
    #[must_use]
    pub fn staged(&self, token: &str, rel: &str) -> PathBuf {
        Self::join(&self.temp_dir(token), rel)
    }

    /// The journal of one transaction.
    #[must_use]
    pub fn journal_path(&self, token: &str) -> PathBuf {
        self.temp_root().join(format!("{token}{JOURNAL_SUFFIX}"))
    }

    /// Backup path of a store-relative path.
    #[must_use]
    pub fn backup_path(&self, rel: &str) -> PathBuf {
        backup_of(&self.abs(rel))
    }

    /// The dictionary file.
    #[must_use]
    pub fn dictionary_path(&self) -> PathBuf {
        self.root.join(DICTIONARY_FILE)
    }

    /// Scratch file for dictionary rewrites.
    #[must_use]
    pub fn dictionary_temp_path(&self) -> PathBuf {
        self.root.join(DICTIONARY_TEMP)
    }

    /// The lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_paths() {
        let layout = Layout::new("/db");
        let id = EntityId::from_bytes([0x11; 16]);
        let rel = Layout::record_rel("shop.Order", id);
        assert_eq!(rel, format!("shop/Order/{id}"));
        assert_eq!(
            layout.abs(&rel),
            PathBuf::from("/db").join("shop").join("Order").join(id.to_string())
        );
        assert_eq!(layout.type_dir("shop.Order"), PathBuf::from("/db/shop/Order"));
    }

    #[test]
    fn staging_mirrors_production() {
        let layout = Layout::new("/db");
        let staged = layout.staged("1-2-abcd", "shop/Order/x");
        assert_eq!(staged, PathBuf::from("/db/temp/1-2-abcd/shop/Order/x"));
        assert_eq!(
            layout.journal_path("1-2-abcd"),
            PathBuf::from("/db/temp/1-2-abcd.journal")
        );
    }

    #[test]
    fn blob_and_backup_paths() {
        let layout = Layout::new("/db");
        let id = EntityId::from_bytes([0; 16]);
        let rel = Layout::blob_rel(BlobKind::Image, id, "ff");
        assert_eq!(rel, format!("imgs/{id}/ff"));
        assert_eq!(
            layout.backup_path(&Layout::blob_dir_rel(BlobKind::File, id)),
            PathBuf::from(format!("/db/files/{id}.bak"))
        );
    }
}
