//! Log sequence numbers.

use std::fmt;

use vellum_codec::{CodecResult, Decode, Decoder, Encode, Encoder};

/// Position of a record in the log: the segment that holds it and the
/// byte offset inside that segment where the record begins.
///
/// Ordering is lexicographic over `(segment, position)`, which matches
/// the order records were logged in. An `Lsn` says nothing about the
/// record it points at; it is only a totally ordered address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lsn {
    /// Segment file the record lives in.
    pub segment: u64,
    /// Byte offset of the record within the segment.
    pub position: u32,
}

impl Lsn {
    /// Smallest possible position, older than every real record.
    pub const ZERO: Lsn = Lsn {
        segment: 0,
        position: 0,
    };

    /// Serialized width on a page header or inside a record payload.
    pub const ENCODED_LEN: usize = 8 + 4;

    /// Creates a new position.
    #[must_use]
    pub const fn new(segment: u64, position: u32) -> Self {
        Self { segment, position }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.position)
    }
}

impl Encode for Lsn {
    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_u64(self.segment);
        encoder.write_u32(self.position);
    }
}

impl Decode for Lsn {
    fn decode_from(decoder: &mut Decoder<'_>) -> CodecResult<Self> {
        let segment = decoder.read_u64()?;
        let position = decoder.read_u32()?;
        Ok(Self { segment, position })
    }
}
