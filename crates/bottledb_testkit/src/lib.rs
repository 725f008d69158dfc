//! # BottleDB Testkit
//!
//! Test utilities for BottleDB.
//!
//! This crate provides:
//! - Test fixtures: the sample shop schema and throwaway stores
//! - Fault injection that interrupts the commit pipeline at chosen points
//! - Property-based test generators using proptest
//! - Stress testing utilities for concurrent transactions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bottledb_testkit::prelude::*;
//!
//! #[test]
//! fn saves_a_customer() {
//!     with_temp_store(|store| {
//!         store.save(&customer("ada@example.com", "Ada")).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
