//! Error types for BottleDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in BottleDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// File-system error.
    #[error("storage error: {0}")]
    Storage(#[from] bottledb_storage::StorageError),

    /// Capsule grammar error.
    #[error("codec error: {0}")]
    Codec(#[from] bottledb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record or the dictionary cannot be interpreted.
    ///
    /// This is fatal; retrying will not help.
    #[error("corrupt record {location}: {message}")]
    CorruptRecord {
        /// The record or file that failed.
        location: String,
        /// Description of the corruption.
        message: String,
    },

    /// A unique field collides with a live entity of the same type.
    #[error("duplicate value for unique field {type_name}.{field} (conflicts with {conflicting_id})")]
    DuplicateUniqueField {
        /// The entity type.
        type_name: String,
        /// The unique field.
        field: String,
        /// Identity of the entity already holding the value.
        conflicting_id: String,
    },

    /// A referenced record does not exist.
    #[error("record not found: {reference}")]
    MissingRecord {
        /// The missing record, as `type:id`.
        reference: String,
    },

    /// A blob referenced from a capsule is absent.
    #[error("blob not found: {path}")]
    MissingBlob {
        /// Store-relative path of the blob.
        path: String,
    },

    /// An entity cannot be deleted while other entities point at it.
    #[error("{reference} is still referenced by {referrers:?}")]
    StillReferenced {
        /// The entity being deleted.
        reference: String,
        /// The live referrers.
        referrers: Vec<String>,
    },

    /// A lock could not be acquired within the configured timeout.
    #[error("timed out waiting for lock on {key}")]
    LockTimeout {
        /// The contended lock key.
        key: String,
    },

    /// Rollback after a failed commit did not complete.
    ///
    /// The store may be inconsistent until recovery runs; the transaction
    /// journal is left in place for that purpose.
    #[error("rollback failed after {cause}: {failures:?}")]
    RollbackFailed {
        /// The error that triggered the rollback.
        cause: Box<CoreError>,
        /// The individual rollback steps that failed.
        failures: Vec<String>,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A type name is not known to the schema or dictionary.
    #[error("unknown type: {name}")]
    UnknownType {
        /// The type name or index.
        name: String,
    },

    /// An attribute is not declared by its type.
    #[error("unknown field {type_name}.{field}")]
    UnknownField {
        /// The owning type.
        type_name: String,
        /// The undeclared field.
        field: String,
    },

    /// A value does not match the declared field type.
    #[error("type mismatch for {type_name}.{field}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The owning type.
        type_name: String,
        /// The field.
        field: String,
        /// The declared type.
        expected: String,
        /// The kind of value supplied.
        found: String,
    },

    /// Store is already open in another handle or process.
    #[error("store locked: another handle has exclusive access")]
    StoreLocked,

    /// Invalid store layout or schema definition.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Creates a missing record error.
    pub fn missing_record(reference: impl ToString) -> Self {
        Self::MissingRecord {
            reference: reference.to_string(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }

    /// Returns true for errors that mean the store may be inconsistent.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. } | Self::CorruptRecord { .. })
    }
}
