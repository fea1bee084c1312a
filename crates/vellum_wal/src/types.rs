//! Identifier newtypes shared across the log.

use std::fmt;

use vellum_codec::{CodecResult, Decode, Decoder, Encode, Encoder};

/// Identifier of one logical operation.
///
/// Every record that participates in redo/undo carries the id of the
/// operation it belongs to, so recovery can group a begin record, the
/// mutations that follow it and the end record into one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u32);

impl OperationId {
    /// Creates a new operation id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

/// Identifier of one storage file known to the page store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    /// Creates a new file id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Physical location of a stored record: a collection id plus the
/// position of the record within that collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordReference {
    /// Collection that owns the record.
    pub collection: u32,
    /// Position of the record inside the collection.
    pub position: u64,
}

impl RecordReference {
    /// Serialized width: collection id plus position.
    pub const ENCODED_LEN: usize = 4 + 8;

    /// Creates a new reference.
    #[must_use]
    pub const fn new(collection: u32, position: u64) -> Self {
        Self {
            collection,
            position,
        }
    }
}

impl fmt::Display for RecordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.collection, self.position)
    }
}

impl Encode for RecordReference {
    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_u32(self.collection);
        encoder.write_u64(self.position);
    }
}

impl Decode for RecordReference {
    fn decode_from(decoder: &mut Decoder<'_>) -> CodecResult<Self> {
        let collection = decoder.read_u32()?;
        let position = decoder.read_u64()?;
        Ok(Self {
            collection,
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_accessors() {
        let id = OperationId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(id.to_string(), "op:42");
    }

    #[test]
    fn file_id_ordering() {
        assert!(FileId::new(1) < FileId::new(2));
        assert_eq!(FileId::new(7).to_string(), "file:7");
    }

    #[test]
    fn record_reference_round_trip() {
        let reference = RecordReference::new(12, 38);
        let bytes = reference.encode();
        assert_eq!(bytes.len(), RecordReference::ENCODED_LEN);
        assert_eq!(RecordReference::decode(&bytes).unwrap(), reference);
        assert_eq!(reference.to_string(), "#12:38");
    }
}
