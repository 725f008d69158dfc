//! # BottleDB Core
//!
//! Embedded, file-backed object persistence for entity graphs.
//!
//! This crate provides:
//! - A value model and schema for application entities
//! - The object codec between entities and capsule records
//! - Bottles: the staged new state of everything reachable from a root
//! - Per-identity reader/writer locks with deadlock-free batch acquisition
//! - Reverse-reference tracking with cascade deletion
//! - Unique-field validation
//! - Atomic commits with backup, rollback and journal-based recovery
//! - Predicate filters, typed collections and store inspection
//!
//! ```rust,ignore
//! use bottledb_core::{Entity, FieldDescriptor, FieldType, Schema, Store, TypeDescriptor};
//!
//! let schema = Schema::from_types([
//!     TypeDescriptor::entity("shop.Customer")
//!         .field(FieldDescriptor::new("email", FieldType::Str).unique()),
//!     TypeDescriptor::entity("shop.Order")
//!         .field(FieldDescriptor::new("customer", FieldType::Entity("shop.Customer".into()))),
//! ])?;
//! let store = Store::open_in_memory(schema)?;
//!
//! let customer = Entity::new("shop.Customer").with("email", "ada@example.com");
//! let order = Entity::new("shop.Order").with("customer", customer);
//! let report = store.save(&order)?;
//! let loaded = store.load(&report.root)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod bottle;
mod codec;
mod config;
mod dictionary;
mod entity;
mod error;
mod filter;
mod inspect;
mod layout;
mod lock;
mod reader;
mod schema;
mod store;
mod tracker;
mod transaction;
mod typed;
mod types;
mod unique;
mod value;

pub use blob::{content_hash, Blob, BlobCodec, BlobKind, RawBytes, Utf8Text};
pub use bottle::Bottle;
pub use config::{Config, LoadMode};
pub use dictionary::{parse_dictionary, render_dictionary, TypeRegistry};
pub use entity::{AttributeAccessor, Entity, EntityId, Object, Ref, ENTITY_ID_LEN};
pub use error::{CoreError, CoreResult};
pub use filter::{All, Filter, Predicate};
pub use inspect::{
    InspectionReport, Inspector, IntegrityIssue, IntegrityReport, IssueKind, JournalSummary,
    TypeSummary,
};
pub use layout::Layout;
pub use lock::{LockKey, LockManager, LockMode, LockSet, LockStats};
pub use schema::{
    type_path, FieldDescriptor, FieldType, Schema, TypeDescriptor, TypeKind, PRIMITIVE_TYPES,
};
pub use store::Store;
pub use transaction::{
    recover, CommitReport, Journal, JournalEntry, RecoveryReport, Transaction, TransactionManager,
    TransactionState, JOURNAL_HEADER,
};
pub use typed::{Collection, Persist};
pub use types::{TransactionId, TypeTag};
pub use value::Value;
