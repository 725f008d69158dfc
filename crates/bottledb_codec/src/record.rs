//! Stored record layout.
//!
//! ```text
//! record := capsule [ "ref" ( "::" tag ":" id )+ ] [ "~deleted" ]
//! ```
//!
//! The reference section lists every other entity whose capsule points at
//! this one. Entries are kept sorted by `(tag, id)` so that rewriting an
//! unchanged record produces identical bytes.

use crate::error::{CodecError, CodecResult};
use crate::parser::parse_prefix;
use crate::syntax::Capsule;
use std::collections::BTreeSet;
use std::fmt;

/// Marker that opens the reference section.
pub const REF_MARKER: &str = "ref";

/// Separator in front of each reference entry.
pub const REF_SEPARATOR: &str = "::";

/// Trailing soft-delete marker.
pub const DELETED_MARKER: &str = "~deleted";

/// One entry of a record's reference section: the entity at `tag`/`id`
/// points at the record's entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefEntry {
    /// Type index of the referring entity.
    pub tag: u32,
    /// Textual identity of the referring entity.
    pub id: String,
}

impl RefEntry {
    /// Creates a reference entry.
    pub fn new(tag: u32, id: impl Into<String>) -> Self {
        Self { tag, id: id.into() }
    }
}

impl fmt::Display for RefEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag, self.id)
    }
}

/// The parsed form of one stored entity file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// The entity's capsule.
    pub capsule: Capsule,
    /// The reverse-reference set.
    pub references: BTreeSet<RefEntry>,
    /// Whether the record is logically removed and awaits purging.
    pub deleted: bool,
}

impl StoredRecord {
    /// Creates a live record with no referrers.
    #[must_use]
    pub fn new(capsule: Capsule) -> Self {
        Self {
            capsule,
            references: BTreeSet::new(),
            deleted: false,
        }
    }

    /// Returns true if nothing points at this record.
    #[must_use]
    pub fn is_orphan(&self) -> bool {
        self.references.is_empty()
    }

    /// Parses a stored record.
    ///
    /// A single trailing line ending is tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error if the capsule or the trailer is malformed.
    ///
    /// # Example
    ///
    /// ```
    /// use bottledb_codec::{RefEntry, StoredRecord};
    ///
    /// let record = StoredRecord::parse("{2:{}}ref::0:ab::1:cd").unwrap();
    /// assert!(record.references.contains(&RefEntry::new(1, "cd")));
    /// assert!(!record.deleted);
    /// ```
    pub fn parse(text: &str) -> CodecResult<Self> {
        let text = text
            .strip_suffix("\r\n")
            .or_else(|| text.strip_suffix('\n'))
            .unwrap_or(text);
        let (capsule, end) = parse_prefix(text)?;
        let mut rest = &text[end..];

        let deleted = match rest.strip_suffix(DELETED_MARKER) {
            Some(head) => {
                rest = head;
                true
            }
            None => false,
        };

        let references = if rest.is_empty() {
            BTreeSet::new()
        } else {
            parse_references(rest)?
        };

        Ok(Self {
            capsule,
            references,
            deleted,
        })
    }

    /// Renders the record as stored text.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

fn parse_references(section: &str) -> CodecResult<BTreeSet<RefEntry>> {
    let entries = section
        .strip_prefix(REF_MARKER)
        .and_then(|s| s.strip_prefix(REF_SEPARATOR))
        .ok_or_else(|| {
            CodecError::invalid_trailer(format!("expected \"ref::\", found {section:?}"))
        })?;

    let mut out = BTreeSet::new();
    for entry in entries.split(REF_SEPARATOR) {
        let (tag, id) = entry
            .split_once(':')
            .ok_or_else(|| CodecError::invalid_trailer(format!("entry {entry:?} lacks ':'")))?;
        let tag = tag
            .parse::<u32>()
            .map_err(|_| CodecError::invalid_trailer(format!("bad type index {tag:?}")))?;
        if id.is_empty() || id.contains([':', '{', '}', '~']) {
            return Err(CodecError::invalid_trailer(format!("bad identity {id:?}")));
        }
        out.insert(RefEntry::new(tag, id));
    }
    Ok(out)
}

impl fmt::Display for StoredRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.capsule)?;
        if !self.references.is_empty() {
            f.write_str(REF_MARKER)?;
            for entry in &self.references {
                write!(f, "{REF_SEPARATOR}{entry}")?;
            }
        }
        if self.deleted {
            f.write_str(DELETED_MARKER)?;
        }
        Ok(())
    }
}
