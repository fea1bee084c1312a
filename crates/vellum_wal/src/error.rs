//! Error types for the write-ahead log.

use thiserror::Error;

use crate::lsn::Lsn;

/// Errors produced by logging, flushing, scanning and recovery.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] vellum_storage::StorageError),

    /// Record payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] vellum_codec::CodecError),

    /// Filesystem operation outside a storage backend failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A checksummed page contained a record kind this build does not know.
    #[error("unknown record kind tag {tag:#06x} at {lsn}")]
    UnknownRecordKind {
        /// Kind tag found in the record header.
        tag: u16,
        /// Position of the offending record.
        lsn: Lsn,
    },

    /// Record payload exceeds what a segment can hold.
    #[error("record of {size} bytes exceeds maximum record size {max}")]
    RecordTooLarge {
        /// Serialized size of the rejected record.
        size: usize,
        /// Largest admissible record payload.
        max: usize,
    },

    /// Replay observed state that contradicts the log.
    #[error("recovery inconsistency at {lsn}: {message}")]
    RecoveryInconsistency {
        /// Description of the mismatch.
        message: String,
        /// Record that exposed the inconsistency.
        lsn: Lsn,
    },

    /// Another process holds the log directory.
    #[error("log directory {path} is locked by another process")]
    DirectoryLocked {
        /// Directory that could not be locked.
        path: String,
    },

    /// Configuration rejected before the log was opened.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the rejected setting.
        message: String,
    },

    /// An encrypted page was found but no key was configured.
    #[error("page {page_index} of segment {segment} is encrypted and no key is configured")]
    EncryptionKeyRequired {
        /// Segment holding the page.
        segment: u64,
        /// Page index within the segment.
        page_index: u64,
    },

    /// Page access outside the payload area.
    #[error("page access at offset {offset} with length {len} exceeds capacity {capacity}")]
    PageOutOfBounds {
        /// Requested payload offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Payload capacity of the page.
        capacity: usize,
    },

    /// A record failed structural validation after decoding.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the violated constraint.
        message: String,
    },

    /// Internal state machine violation.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violation.
        message: String,
    },

    /// The background writer is gone and durability can no longer be
    /// guaranteed.
    #[error("log writer stopped: {message}")]
    WriterStopped {
        /// Why the writer is gone.
        message: String,
    },
}

impl WalError {
    /// Creates an [`WalError::UnknownRecordKind`] error.
    #[must_use]
    pub fn unknown_record_kind(tag: u16, lsn: Lsn) -> Self {
        Self::UnknownRecordKind { tag, lsn }
    }

    /// Creates an [`WalError::RecordTooLarge`] error.
    #[must_use]
    pub fn record_too_large(size: usize, max: usize) -> Self {
        Self::RecordTooLarge { size, max }
    }

    /// Creates an [`WalError::RecoveryInconsistency`] error.
    #[must_use]
    pub fn recovery_inconsistency(message: impl Into<String>, lsn: Lsn) -> Self {
        Self::RecoveryInconsistency {
            message: message.into(),
            lsn,
        }
    }

    /// Creates an [`WalError::InvalidConfig`] error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an [`WalError::InvalidRecord`] error.
    #[must_use]
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an [`WalError::InvalidState`] error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an [`WalError::WriterStopped`] error.
    #[must_use]
    pub fn writer_stopped(message: impl Into<String>) -> Self {
        Self::WriterStopped {
            message: message.into(),
        }
    }
}

/// Convenience alias used across the crate.
pub type WalResult<T> = Result<T, WalError>;
