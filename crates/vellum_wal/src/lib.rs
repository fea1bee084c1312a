//! # Vellum WAL
//!
//! Write-ahead log for the VellumDB durability core.
//!
//! Every page and index mutation is logged before it reaches storage.
//! Producers append concurrently to a lock-free record buffer; a
//! background writer packs records into checksummed pages and appends
//! them to segment files; after a crash, [`restore`] replays the log
//! to bring storage back to the last committed state.
//!
//! ## On-disk format
//!
//! Segments are sequences of fixed-size pages (4096 bytes by default):
//!
//! ```text
//! offset  size  field
//!      0     8  magic
//!      8     8  xxh64 checksum of the record area
//!     16     4  last operation id
//!     20     2  used bytes
//!     22   ...  length-prefixed record entries
//! ```
//!
//! Record content spans page boundaries, only whole pages are ever
//! written, and a page that fails its checksum marks the torn tail of
//! the log. With encryption configured, everything past the magic is
//! AES-128-CTR encrypted under a per-page nonce.
//!
//! ## Example
//!
//! ```rust
//! use vellum_wal::{FileId, LogManager, Lsn, PageOp, PageOpKind, RecordBody, WalConfig};
//!
//! # fn main() -> vellum_wal::WalResult<()> {
//! let dir = tempfile::tempdir()?;
//! let log = LogManager::open(dir.path(), WalConfig::new())?;
//!
//! let operation = log.begin_operation()?;
//! log.log(RecordBody::Page(PageOp {
//!     operation_id: operation,
//!     file: FileId::new(1),
//!     page_index: 0,
//!     prev_page_lsn: Lsn::ZERO,
//!     kind: PageOpKind::SizeCounterChange {
//!         counter_offset: 16,
//!         delta: 1,
//!     },
//! }))?;
//! let commit = log.end_operation(operation, false)?;
//! log.wait_durable(commit)?;
//! log.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod buffer;
mod config;
mod error;
pub mod log;
mod lsn;
pub mod page;
mod record;
mod recovery;
mod stats;
mod types;

pub use apply::{
    IndexStorage, MemoryIndexStorage, MemoryPageStore, PageHandle, PageStore, PAGE_PAYLOAD_OFFSET,
};
pub use buffer::{Cursor, RecordBuffer};
pub use config::{AesKey, EncryptionConfig, WalConfig};
pub use error::{WalError, WalResult};
pub use log::{LogManager, LogScan};
pub use lsn::Lsn;
pub use record::{IndexOp, IndexOpKind, PageOp, PageOpKind, RecordBody, FREE_SLOT};
pub use recovery::{restore, RecoveryReport};
pub use stats::{WalStats, WalStatsSnapshot};
pub use types::{FileId, OperationId, RecordReference};
