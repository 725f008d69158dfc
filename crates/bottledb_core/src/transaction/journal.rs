//! Transaction journal.
//!
//! ```text
//! bottledb-journal 1
//! backup shop/Order/<id>     # production path renamed to <path>.bak
//! create shop/Item/<id>      # production path that did not exist before
//! purge shop/Item/<id>       # soft-deleted record, removed after commit
//! committed                  # every apply rename succeeded
//! ```
//!
//! The journal is replaced atomically (write a scratch file, rename) so a
//! crash never leaves a truncated journal behind.

use crate::error::{CoreError, CoreResult};
use crate::layout::Layout;
use bottledb_storage::FileSystem;
use std::fmt::Write as _;
use std::path::PathBuf;

/// First line of every journal.
pub const JOURNAL_HEADER: &str = "bottledb-journal 1";

/// Suffix of the scratch file a journal is written through.
pub const JOURNAL_SCRATCH_SUFFIX: &str = ".tmp";

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// A production path that is backed up before being replaced or removed.
    Backup(String),
    /// A production path that is created.
    Create(String),
    /// A soft-deleted record to remove once committed.
    Purge(String),
    /// The commit point.
    Committed,
}

/// The parsed journal of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// All entries in order.
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Whether the commit point was reached.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.entries.contains(&JournalEntry::Committed)
    }

    /// Paths backed up by the transaction.
    pub fn backups(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            JournalEntry::Backup(rel) => Some(rel.as_str()),
            _ => None,
        })
    }

    /// Paths created by the transaction.
    pub fn creates(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            JournalEntry::Create(rel) => Some(rel.as_str()),
            _ => None,
        })
    }

    /// Records purged after commit.
    pub fn purges(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            JournalEntry::Purge(rel) => Some(rel.as_str()),
            _ => None,
        })
    }

    /// Parses journal text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] for a missing header or an
    /// unknown line.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let mut lines = text.lines();
        if lines.next() != Some(JOURNAL_HEADER) {
            return Err(CoreError::corrupt("journal", "missing header"));
        }
        let mut journal = Self::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let entry = match line.split_once(' ') {
                Some(("backup", rel)) => JournalEntry::Backup(rel.to_string()),
                Some(("create", rel)) => JournalEntry::Create(rel.to_string()),
                Some(("purge", rel)) => JournalEntry::Purge(rel.to_string()),
                None if line == "committed" => JournalEntry::Committed,
                _ => return Err(CoreError::corrupt("journal", format!("unknown line {line:?}"))),
            };
            journal.push(entry);
        }
        Ok(journal)
    }

    /// Renders the journal as text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = format!("{JOURNAL_HEADER}\n");
        for entry in &self.entries {
            // Writing into a String cannot fail.
            let _ = match entry {
                JournalEntry::Backup(rel) => writeln!(text, "backup {rel}"),
                JournalEntry::Create(rel) => writeln!(text, "create {rel}"),
                JournalEntry::Purge(rel) => writeln!(text, "purge {rel}"),
                JournalEntry::Committed => writeln!(text, "committed"),
            };
        }
        text
    }

    /// Writes the journal of `token`, replacing any earlier version.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or renamed.
    pub fn store(&self, fs: &dyn FileSystem, layout: &Layout, token: &str, sync: bool) -> CoreResult<()> {
        let path = layout.journal_path(token);
        let scratch = scratch_path(layout, token);
        fs.write(&scratch, self.render().as_bytes(), sync)?;
        fs.rename(&scratch, &path)?;
        if sync {
            fs.sync_dir(&layout.temp_root())?;
        }
        Ok(())
    }

    /// Reads the journal of `token`, `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(fs: &dyn FileSystem, layout: &Layout, token: &str) -> CoreResult<Option<Self>> {
        let Some(bytes) = fs.read(&layout.journal_path(token))? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|_| CoreError::corrupt("journal", "not UTF-8"))?;
        Self::parse(&text).map(Some)
    }
}

fn scratch_path(layout: &Layout, token: &str) -> PathBuf {
    let mut path = layout.journal_path(token).into_os_string();
    path.push(JOURNAL_SCRATCH_SUFFIX);
    PathBuf::from(path)
}
