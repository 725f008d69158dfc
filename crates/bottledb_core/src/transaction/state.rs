//! Transaction state.

use crate::entity::Ref;
use crate::types::TransactionId;
use std::fmt;

/// Phase of a write transaction.
///
/// ```text
/// Created -> Locked -> Staged -> BackedUp -> Applied -> Committed
///                        |          |           |
///                        +----------+-----------+--> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransactionState {
    /// Nothing has happened yet.
    Created,
    /// All identity locks are held.
    Locked,
    /// New records and attachments are in the staging area and the
    /// journal is durable.
    Staged,
    /// Production paths are being (or have been) renamed to backups.
    BackedUp,
    /// Staged paths are being (or have been) moved into production.
    Applied,
    /// The journal says committed; only cleanup remains.
    Committed,
    /// The transaction failed and its effects were undone.
    RolledBack,
}

impl TransactionState {
    /// Whether `next` directly follows this state.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        use TransactionState::{Applied, BackedUp, Committed, Created, Locked, RolledBack, Staged};
        matches!(
            (self, next),
            (Created, Locked)
                | (Locked, Staged)
                | (Staged, BackedUp)
                | (BackedUp, Applied)
                | (Applied, Committed)
                | (Created | Locked | Staged | BackedUp | Applied, RolledBack)
        )
    }

    /// Whether production may differ from its state before the transaction.
    #[must_use]
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::BackedUp | Self::Applied)
    }

    /// Whether the transaction has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Locked => "locked",
            Self::Staged => "staged",
            Self::BackedUp => "backed-up",
            Self::Applied => "applied",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// Outcome of a committed save or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    /// The transaction.
    pub id: TransactionId,
    /// Staging token; names the staging directory and journal.
    pub token: String,
    /// The saved or deleted root.
    pub root: Ref,
    /// Records written with a new version.
    pub written: usize,
    /// Records whose reverse references alone changed.
    pub updated: usize,
    /// Entities deleted, the root of a delete included.
    pub deleted: Vec<Ref>,
}

impl CommitReport {
    /// Whether the commit touched nothing on disk.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.updated == 0 && self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions() {
        use TransactionState::*;
        let path = [Created, Locked, Staged, BackedUp, Applied, Committed];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Created.can_advance_to(Staged));
        assert!(!Committed.can_advance_to(RolledBack));
        assert!(Applied.can_advance_to(RolledBack));
    }

    #[test]
    fn destructive_states() {
        assert!(!TransactionState::Staged.is_destructive());
        assert!(TransactionState::BackedUp.is_destructive());
        assert!(TransactionState::Applied.is_destructive());
        assert!(TransactionState::Committed.is_terminal());
    }
}
