//! # Vellum Testkit
//!
//! Test utilities for the VellumDB durability core.
//!
//! This crate provides:
//! - Log fixtures in temporary directories with automatic cleanup
//! - Crash simulation: failing storage backends and segment file surgery
//! - Property-based generators for log records using proptest
//! - End-to-end recovery harnesses shared by the integration tests
//!
//! ## Usage
//!
//! ```rust
//! use vellum_testkit::prelude::*;
//! use vellum_wal::RecordBody;
//!
//! let log = TestLog::open();
//! let lsn = log.log(RecordBody::Empty).unwrap();
//! log.flush().unwrap();
//! assert!(log.flushed_lsn() > lsn);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Common imports for test code.
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
