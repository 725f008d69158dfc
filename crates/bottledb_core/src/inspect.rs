//! Schema-less inspection of a store directory.
//!
//! The [`Inspector`] reads a store without its schema: it needs nothing but
//! the dictionary, so it works on stores written by any application. It
//! counts records, lists pending journals, and checks every `ref::` entry
//! against the capsule of the referrer.

use crate::dictionary::parse_dictionary;
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::layout::{Layout, BACKUP_SUFFIX, JOURNAL_SUFFIX};
use crate::reader::parse_record;
use crate::schema::PRIMITIVE_TYPES;
use crate::transaction::Journal;
use crate::types::TypeTag;
use bottledb_codec::StoredRecord;
use bottledb_storage::FileSystem;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Kind of an integrity problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// A `ref::` entry names an entity that does not exist.
    MissingReferrer,
    /// A `ref::` entry names an entity whose capsule does not point here.
    StaleReference,
    /// A capsule points at an entity whose `ref::` section omits it.
    MissingBackReference,
    /// A capsule points at an entity that does not exist.
    DanglingReference,
    /// The record could not be read or parsed.
    Unreadable(String),
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReferrer => f.write_str("missing referrer"),
            Self::StaleReference => f.write_str("stale reference"),
            Self::MissingBackReference => f.write_str("missing back-reference"),
            Self::DanglingReference => f.write_str("dangling reference"),
            Self::Unreadable(message) => write!(f, "unreadable: {message}"),
        }
    }
}

/// One integrity problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    /// The record the problem is about, as `tag:id`.
    pub target: String,
    /// The other side of the reference, if any.
    pub referrer: Option<String>,
    /// What is wrong.
    pub kind: IssueKind,
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.referrer {
            Some(referrer) => write!(f, "{}: {} ({referrer})", self.target, self.kind),
            None => write!(f, "{}: {}", self.target, self.kind),
        }
    }
}

/// Outcome of a reference check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Live records checked.
    pub records: usize,
    /// Problems found.
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// Whether no problem was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Record counts of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSummary {
    /// Dictionary index.
    pub tag: TypeTag,
    /// Type name.
    pub name: String,
    /// Live records.
    pub live: usize,
    /// Soft-deleted records awaiting purge.
    pub deleted: usize,
    /// Backups of in-flight or interrupted commits.
    pub backups: usize,
}

/// A journal found in the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalSummary {
    /// Transaction token.
    pub token: String,
    /// Whether the commit point was reached.
    pub committed: bool,
    /// Number of journal lines after the header.
    pub entries: usize,
}

/// Everything [`Inspector::inspect`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionReport {
    /// Per-type counts, in tag order. Primitive types are left out.
    pub types: Vec<TypeSummary>,
    /// Pending journals.
    pub journals: Vec<JournalSummary>,
    /// Reference problems.
    pub integrity: IntegrityReport,
}

/// Reads a store directory without a schema.
#[derive(Debug)]
pub struct Inspector {
    fs: Arc<dyn FileSystem>,
    layout: Layout,
    names: Vec<String>,
}

impl Inspector {
    /// Opens the store at `root`.
    ///
    /// The store lock is not taken; results taken while another process
    /// commits may show transient problems.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary is missing or corrupt.
    pub fn open(fs: Arc<dyn FileSystem>, root: impl Into<std::path::PathBuf>) -> CoreResult<Self> {
        let layout = Layout::new(root);
        let bytes = fs.read(&layout.dictionary_path())?.ok_or_else(|| {
            CoreError::invalid_format(format!("{} has no dictionary", layout.root().display()))
        })?;
        let text = String::from_utf8(bytes).map_err(|_| CoreError::corrupt("dictionary", "not UTF-8"))?;
        Ok(Self {
            names: parse_dictionary(&text)?,
            fs,
            layout,
        })
    }

    /// The registered types in tag order.
    #[must_use]
    pub fn dictionary(&self) -> &[String] {
        &self.names
    }

    fn entity_types(&self) -> impl Iterator<Item = (TypeTag, &str)> {
        self.names.iter().enumerate().filter_map(|(i, name)| {
            let tag = TypeTag::try_from(i).ok()?;
            (!PRIMITIVE_TYPES.contains(&name.as_str())).then_some((tag, name.as_str()))
        })
    }

    fn read(&self, tag: TypeTag, id: &str) -> CoreResult<Option<StoredRecord>> {
        let Some(name) = self.names.get(tag as usize) else {
            return Ok(None);
        };
        let path = self.layout.type_dir(name).join(id);
        match self.fs.read(&path)? {
            Some(bytes) => parse_record(&path, bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Counts records, lists journals and checks references.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be listed. Unreadable records
    /// and journals are reported, not returned.
    pub fn inspect(&self) -> CoreResult<InspectionReport> {
        let mut report = InspectionReport::default();
        let mut live = BTreeMap::new();

        for (tag, name) in self.entity_types() {
            let mut summary = TypeSummary {
                tag,
                name: name.to_string(),
                live: 0,
                deleted: 0,
                backups: 0,
            };
            for entry in self.fs.list(&self.layout.type_dir(name))? {
                if entry.is_dir {
                    continue;
                }
                if entry.name.ends_with(BACKUP_SUFFIX) {
                    summary.backups += 1;
                    continue;
                }
                if EntityId::parse(&entry.name).is_err() {
                    continue;
                }
                match self.read(tag, &entry.name) {
                    Ok(Some(record)) if record.deleted => summary.deleted += 1,
                    Ok(Some(record)) => {
                        summary.live += 1;
                        live.insert((tag, entry.name.clone()), record);
                    }
                    Ok(None) => {}
                    Err(e) => report.integrity.issues.push(IntegrityIssue {
                        target: format!("{tag}:{}", entry.name),
                        referrer: None,
                        kind: IssueKind::Unreadable(e.to_string()),
                    }),
                }
            }
            report.types.push(summary);
        }
        report.integrity.records = live.len();

        for ((tag, id), record) in &live {
            for entry in &record.references {
                let kind = match live.get(&(entry.tag, entry.id.clone())) {
                    None => IssueKind::MissingReferrer,
                    Some(referrer) if !referrer.capsule.contains_text_node(&tag.to_string(), id) => {
                        IssueKind::StaleReference
                    }
                    Some(_) => continue,
                };
                report.integrity.issues.push(IntegrityIssue {
                    target: format!("{tag}:{id}"),
                    referrer: Some(entry.to_string()),
                    kind,
                });
            }
        }

        report.journals = self.journals()?;
        Ok(report)
    }

    /// Journals in the staging area, in token order.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory cannot be listed or a
    /// journal cannot be read.
    pub fn journals(&self) -> CoreResult<Vec<JournalSummary>> {
        let mut journals = Vec::new();
        for entry in self.fs.list(&self.layout.temp_root())? {
            let Some(token) = entry.name.strip_suffix(JOURNAL_SUFFIX) else {
                continue;
            };
            if entry.is_dir {
                continue;
            }
            if let Some(journal) = Journal::load(self.fs.as_ref(), &self.layout, token)? {
                journals.push(JournalSummary {
                    token: token.to_string(),
                    committed: journal.is_committed(),
                    entries: journal.entries().len(),
                });
            }
        }
        Ok(journals)
    }
}
