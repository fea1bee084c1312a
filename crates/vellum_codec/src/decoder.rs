//! Fixed-width little-endian decoder.

use crate::error::{CodecError, CodecResult};

/// Maximum accepted length prefix for byte strings.
///
/// Log records are bounded by page packing far below this; the guard
/// only exists so corrupt input cannot trigger huge allocations.
pub const MAX_BYTES_LENGTH: u32 = 64 * 1024 * 1024;

/// A cursor-based binary decoder over a borrowed byte slice.
///
/// The exact inverse of [`crate::Encoder`]: little-endian integers,
/// one-byte presence flags, 4-byte length prefixes.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a new decoder over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Assert that the input was fully consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TrailingBytes`] if bytes remain; decoding
    /// a fixed-layout value that leaves residue means the input was
    /// built by a different layout and must be rejected.
    pub fn finish(&self) -> CodecResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::trailing_bytes(self.remaining()))
        }
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::unexpected_eof(len, self.remaining()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a `u16`.
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().map_err(|_| {
            CodecError::unexpected_eof(2, 0)
        })?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| {
            CodecError::unexpected_eof(4, 0)
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a `u64`.
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| {
            CodecError::unexpected_eof(8, 0)
        })?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Read an `i64`.
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| {
            CodecError::unexpected_eof(8, 0)
        })?;
        Ok(i64::from_le_bytes(bytes))
    }

    /// Read a 0/1 byte as a bool.
    ///
    /// # Errors
    ///
    /// Any other value is [`CodecError::InvalidFlag`]: flags are never
    /// inferred from arbitrary truthiness.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(CodecError::InvalidFlag { value }),
        }
    }

    /// Read `len` raw bytes with no length prefix.
    pub fn read_raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        self.take(len)
    }

    /// Read a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_u32()?;
        if len > MAX_BYTES_LENGTH {
            return Err(CodecError::LengthOverflow {
                length: u64::from(len),
                max: u64::from(MAX_BYTES_LENGTH),
            });
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> CodecResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Read an optional `u64` written by [`crate::Encoder::write_option_u64`].
    pub fn read_option_u64(&mut self) -> CodecResult<Option<u64>> {
        if self.read_bool()? {
            Ok(Some(self.read_u64()?))
        } else {
            Ok(None)
        }
    }

    /// Read an optional byte string.
    pub fn read_option_bytes(&mut self) -> CodecResult<Option<Vec<u8>>> {
        if self.read_bool()? {
            Ok(Some(self.read_bytes()?))
        } else {
            Ok(None)
        }
    }

    /// Read an optional UTF-8 string.
    pub fn read_option_str(&mut self) -> CodecResult<Option<String>> {
        if self.read_bool()? {
            Ok(Some(self.read_str()?))
        } else {
            Ok(None)
        }
    }
}
