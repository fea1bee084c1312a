//! # Vellum Codec
//!
//! Fixed-width binary encoding/decoding primitives for the VellumDB
//! log format.
//!
//! Every on-disk structure in the log is built from the same small
//! vocabulary, so corrupt input is always detected the same way:
//! - Little-endian fixed-width integers
//! - 4-byte length-prefixed byte strings
//! - Explicit one-byte presence flags for optional values (absence is
//!   never inferred from a sentinel value)
//! - Decoders reject trailing bytes, truncated input, and flag bytes
//!   other than 0/1
//!
//! ## Usage
//!
//! ```
//! use vellum_codec::{Decoder, Encoder};
//!
//! let mut enc = Encoder::new();
//! enc.write_u32(45);
//! enc.write_option_u64(None);
//! let bytes = enc.into_bytes();
//!
//! let mut dec = Decoder::new(&bytes);
//! assert_eq!(dec.read_u32().unwrap(), 45);
//! assert_eq!(dec.read_option_u64().unwrap(), None);
//! assert!(dec.finish().is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;

pub use decoder::{Decoder, MAX_BYTES_LENGTH};
pub use encoder::Encoder;
pub use error::{CodecError, CodecResult};

/// Trait for types with a canonical binary form.
pub trait Encode {
    /// Append this value's binary form to the encoder.
    fn encode_into(&self, encoder: &mut Encoder);

    /// Encode this value to a fresh byte vector.
    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_into(&mut encoder);
        encoder.into_bytes()
    }
}

/// Trait for types decodable from their canonical binary form.
pub trait Decode: Sized {
    /// Read one value from the decoder, advancing its position.
    fn decode_from(decoder: &mut Decoder<'_>) -> CodecResult<Self>;

    /// Decode a value from a byte slice, rejecting trailing bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut decoder = Decoder::new(bytes);
        let value = Self::decode_from(&mut decoder)?;
        decoder.finish()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Pair {
        left: u64,
        right: Option<u64>,
    }

    impl Encode for Pair {
        fn encode_into(&self, encoder: &mut Encoder) {
            encoder.write_u64(self.left);
            encoder.write_option_u64(self.right);
        }
    }

    impl Decode for Pair {
        fn decode_from(decoder: &mut Decoder<'_>) -> CodecResult<Self> {
            Ok(Self {
                left: decoder.read_u64()?,
                right: decoder.read_option_u64()?,
            })
        }
    }

    #[test]
    fn derived_encode_decode_round_trip() {
        let pair = Pair {
            left: 10,
            right: Some(20),
        };
        let bytes = pair.encode();
        let back = Pair::decode(&bytes).unwrap();
        assert_eq!(back.left, 10);
        assert_eq!(back.right, Some(20));
    }

    #[test]
    fn decode_rejects_residue() {
        let pair = Pair {
            left: 1,
            right: None,
        };
        let mut bytes = pair.encode();
        bytes.push(0xee);
        assert!(matches!(
            Pair::decode(&bytes).unwrap_err(),
            CodecError::TrailingBytes { remaining: 1 }
        ));
    }
}
