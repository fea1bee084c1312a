//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Attempted to truncate storage to a size larger than it holds.
    #[error("cannot truncate to {new_size} bytes: storage holds only {size}")]
    InvalidTruncate {
        /// The requested new size.
        new_size: u64,
        /// The current storage size.
        size: u64,
    },
}
