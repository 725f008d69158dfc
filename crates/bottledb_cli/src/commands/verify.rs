//! Verify command implementation.

use super::{open_inspector, print_json, IssueView, OutputFormat};
use crate::error::CliError;
use serde::Serialize;
use std::path::Path;

/// Verification result.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// Number of live records checked.
    pub records_checked: usize,
    /// Journals still waiting for recovery.
    pub pending_journals: usize,
    /// Problems found.
    pub issues: Vec<IssueView>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Runs the verify command.
///
/// Fails when any issue is found. Pending journals are reported but do
/// not fail verification on their own.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let inspector = open_inspector(path)?;
    let report = inspector.inspect()?;
    let result = VerifyResult {
        records_checked: report.integrity.records,
        pending_journals: report.journals.len(),
        issues: report.integrity.issues.iter().map(IssueView::from).collect(),
    };

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_result(path, &result),
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(CliError::Inconsistent(result.issues.len()))
    }
}

fn print_result(path: &Path, result: &VerifyResult) {
    println!("Verifying store at {}", path.display());
    println!();
    println!("  Records checked: {}", result.records_checked);
    if result.pending_journals > 0 {
        println!(
            "  Pending journals: {} (run `bottledb recover`)",
            result.pending_journals
        );
    }
    for issue in &result.issues {
        match &issue.referrer {
            Some(referrer) => println!("  {}: {} ({referrer})", issue.target, issue.kind),
            None => println!("  {}: {}", issue.target, issue.kind),
        }
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
    } else {
        println!("✗ Store verification failed");
    }
}
