//! # BottleDB Codec
//!
//! The capsule text grammar used by BottleDB stored records.
//!
//! ```text
//! capsule := "{" head ":" payload "}"
//! payload := text | "{}" | capsule+
//! ```
//!
//! This crate knows only the syntax: heads, escaped text and nested capsule
//! sequences, plus the stored-record trailer that carries the reverse
//! references and the soft-delete marker. What a head means (a type index,
//! a field name, `list`, `map`, `file`, `img`) is decided by `bottledb_core`.
//!
//! ## Text rules
//!
//! - A head ends at the first `:` and never contains `{`, `}`, `:` or `\`
//! - Text payloads escape `\`, `{` and `}` with a backslash
//! - An empty node sequence is written `{}`
//! - A payload that starts with an unescaped `{` is a node sequence
//!
//! ## Usage
//!
//! ```
//! use bottledb_codec::{parse, Capsule};
//!
//! let capsule = Capsule::nodes("list", vec![Capsule::text("3", "a:b")]);
//! let text = capsule.to_text();
//! assert_eq!(text, "{list:{3:a:b}}");
//! assert_eq!(parse(&text).unwrap(), capsule);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod parser;
mod record;
mod syntax;
mod writer;

pub use error::{CodecError, CodecResult};
pub use parser::{parse, parse_prefix, parse_sequence, MAX_DEPTH};
pub use record::{RefEntry, StoredRecord, DELETED_MARKER, REF_MARKER, REF_SEPARATOR};
pub use syntax::{is_valid_head, Body, Capsule};
pub use writer::escape;
