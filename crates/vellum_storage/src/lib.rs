//! # Vellum Storage
//!
//! Storage backend trait and implementations for VellumDB log segments.
//!
//! This crate provides the lowest-level storage abstraction of the
//! durability core. Storage backends are **opaque byte stores** - they
//! do not interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, truncate)
//! - No knowledge of page layouts, records, or checksums
//! - Must be `Send + Sync`: the writer thread appends to the active
//!   segment while recovery scanners read finished ones
//! - The log layer owns all format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral logs
//! - [`FileBackend`] - For persistent segment files
//!
//! ## Example
//!
//! ```rust
//! use vellum_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
