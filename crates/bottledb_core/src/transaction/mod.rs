//! Atomic multi-entity commits.
//!
//! BottleDB commits a save or delete with:
//! - **Atomicity**: production paths are renamed to backups before staged
//!   versions replace them, and any failure restores the backups
//! - **Durability**: a journal written before the first destructive step
//!   lets recovery finish or undo an interrupted commit
//! - **Isolation**: identity locks held for the whole pipeline

mod journal;
mod manager;
mod recovery;
mod state;

pub use journal::{Journal, JournalEntry, JOURNAL_HEADER};
pub use manager::{Transaction, TransactionManager};
pub use recovery::{recover, RecoveryReport};
pub use state::{CommitReport, TransactionState};
