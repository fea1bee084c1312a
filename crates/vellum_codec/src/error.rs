//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unexpected end of input.
    #[error("unexpected end of input: needed {needed} more bytes, {remaining} available")]
    UnexpectedEof {
        /// Bytes the read required.
        needed: usize,
        /// Bytes actually left in the input.
        remaining: usize,
    },

    /// Input was not fully consumed by a fixed-layout decode.
    #[error("trailing bytes after decode: {remaining} bytes left")]
    TrailingBytes {
        /// Bytes left unread.
        remaining: usize,
    },

    /// A presence flag byte held something other than 0 or 1.
    #[error("invalid presence flag: {value:#04x}")]
    InvalidFlag {
        /// The byte actually read.
        value: u8,
    },

    /// A length prefix exceeded the permitted maximum.
    #[error("length prefix {length} exceeds maximum of {max} bytes")]
    LengthOverflow {
        /// The declared length.
        length: u64,
        /// The permitted maximum.
        max: u64,
    },

    /// Byte string declared as text was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
}

impl CodecError {
    /// Create an unexpected-EOF error.
    pub fn unexpected_eof(needed: usize, remaining: usize) -> Self {
        Self::UnexpectedEof { needed, remaining }
    }

    /// Create a trailing-bytes error.
    pub fn trailing_bytes(remaining: usize) -> Self {
        Self::TrailingBytes { remaining }
    }
}
