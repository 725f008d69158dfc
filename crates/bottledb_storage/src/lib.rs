//! # BottleDB Storage
//!
//! File-system abstraction for BottleDB.
//!
//! This crate provides the lowest-level storage layer. A store is a
//! directory tree of small text files, and every production mutation is a
//! rename. The file system does not interpret the files it holds.
//!
//! ## Design Principles
//!
//! - The file system is the only shared mutable resource of a store
//! - Renames replace destination files atomically
//! - Missing paths are not errors where callers only need absence
//! - Must be `Send + Sync` for concurrent transactions
//!
//! ## Available File Systems
//!
//! - [`OsFileSystem`] - For persistent stores using OS file APIs
//! - [`MemoryFileSystem`] - For testing and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use bottledb_storage::{FileSystem, MemoryFileSystem};
//! use std::path::Path;
//!
//! let fs = MemoryFileSystem::new();
//! fs.write(Path::new("/store/temp/t1/a"), b"{0:hello}", false).unwrap();
//! fs.rename(Path::new("/store/temp/t1/a"), Path::new("/store/a")).unwrap();
//! assert_eq!(fs.read(Path::new("/store/a")).unwrap(), Some(b"{0:hello}".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod fs;
mod memory;
mod os;

pub use error::{StorageError, StorageResult};
pub use fs::{DirEntry, FileSystem, LockHandle};
pub use memory::MemoryFileSystem;
pub use os::OsFileSystem;
