//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while parsing capsule text or stored records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended inside a capsule.
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEof {
        /// Byte offset where more input was expected.
        offset: usize,
    },

    /// A character appeared where the grammar does not allow it.
    #[error("unexpected {found:?} at byte {offset}, expected {expected}")]
    Unexpected {
        /// Byte offset of the offending character.
        offset: usize,
        /// The character found.
        found: char,
        /// What the parser was looking for.
        expected: &'static str,
    },

    /// Input continued after a complete capsule.
    #[error("trailing input at byte {offset}")]
    TrailingInput {
        /// Byte offset of the first extra character.
        offset: usize,
    },

    /// Capsules nest deeper than the parser allows.
    #[error("nesting exceeds {limit} levels")]
    TooDeep {
        /// The nesting limit.
        limit: usize,
    },

    /// A head (tag or field name) is not valid.
    #[error("invalid head {head:?}")]
    InvalidHead {
        /// The rejected head.
        head: String,
    },

    /// The trailing section of a stored record is malformed.
    #[error("invalid record trailer: {message}")]
    InvalidTrailer {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Create an unexpected-character error.
    pub fn unexpected(offset: usize, found: char, expected: &'static str) -> Self {
        Self::Unexpected {
            offset,
            found,
            expected,
        }
    }

    /// Create an invalid trailer error.
    pub fn invalid_trailer(message: impl Into<String>) -> Self {
        Self::InvalidTrailer {
            message: message.into(),
        }
    }

    /// Create an invalid head error.
    pub fn invalid_head(head: impl Into<String>) -> Self {
        Self::InvalidHead { head: head.into() }
    }
}
