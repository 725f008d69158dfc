//! Inspect command implementation.

use super::{open_inspector, print_json, IssueView, OutputFormat};
use crate::error::CliError;
use bottledb_core::{InspectionReport, TypeTag};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Registered type names, in tag order.
    pub dictionary: Vec<String>,
    /// Per-type record counts.
    pub types: Vec<TypeStats>,
    /// Journals left in the staging area.
    pub journals: Vec<JournalStats>,
    /// Live records checked for integrity.
    pub records: usize,
    /// Integrity problems.
    pub issues: Vec<IssueView>,
}

/// Record counts of one entity type.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    /// Dictionary tag.
    pub tag: TypeTag,
    /// Type name.
    pub name: String,
    /// Live records.
    pub live: usize,
    /// Soft-deleted records.
    pub deleted: usize,
    /// Backup files.
    pub backups: usize,
}

/// A pending journal.
#[derive(Debug, Serialize)]
pub struct JournalStats {
    /// Transaction token.
    pub token: String,
    /// Whether the commit point was reached.
    pub committed: bool,
    /// Journal entries.
    pub entries: usize,
}

impl InspectResult {
    fn new(path: &Path, dictionary: &[String], report: &InspectionReport) -> Self {
        Self {
            path: path.display().to_string(),
            dictionary: dictionary.to_vec(),
            types: report
                .types
                .iter()
                .map(|t| TypeStats {
                    tag: t.tag,
                    name: t.name.clone(),
                    live: t.live,
                    deleted: t.deleted,
                    backups: t.backups,
                })
                .collect(),
            journals: report
                .journals
                .iter()
                .map(|j| JournalStats {
                    token: j.token.clone(),
                    committed: j.committed,
                    entries: j.entries,
                })
                .collect(),
            records: report.integrity.records,
            issues: report.integrity.issues.iter().map(IssueView::from).collect(),
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let inspector = open_inspector(path)?;
    let report = inspector.inspect()?;
    let result = InspectResult::new(path, inspector.dictionary(), &report);

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            print_text_output(&result);
            Ok(())
        }
    }
}

fn print_text_output(result: &InspectResult) {
    println!("BottleDB Store: {}", result.path);
    println!();
    println!("Dictionary ({} types):", result.dictionary.len());
    for (tag, name) in result.dictionary.iter().enumerate() {
        println!("  {tag:>4}  {name}");
    }

    println!();
    println!("Records:");
    println!(
        "  {:<32} {:>8} {:>8} {:>8}",
        "Type", "Live", "Deleted", "Backups"
    );
    for t in &result.types {
        println!(
            "  {:<32} {:>8} {:>8} {:>8}",
            t.name, t.live, t.deleted, t.backups
        );
    }

    println!();
    if result.journals.is_empty() {
        println!("Journals: none");
    } else {
        println!("Journals:");
        for j in &result.journals {
            let state = if j.committed { "committed" } else { "uncommitted" };
            println!("  {} ({state}, {} entries)", j.token, j.entries);
        }
    }

    println!();
    println!(
        "Integrity: {} records, {} issue(s)",
        result.records,
        result.issues.len()
    );
    for issue in &result.issues {
        match &issue.referrer {
            Some(referrer) => println!("  {}: {} ({referrer})", issue.target, issue.kind),
            None => println!("  {}: {}", issue.target, issue.kind),
        }
    }
}
