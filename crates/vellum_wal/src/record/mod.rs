//! Record model.
//!
//! Everything the log stores is a [`WalRecord`]: a body describing what
//! happened plus bookkeeping the log fills in as the record moves
//! through the pipeline. Two bodies never reach disk: the start marker
//! a fresh segment begins with and the milestones the flusher uses as
//! batch boundaries. Both still live in the buffer and carry positions
//! so the bookkeeping stays uniform.
//!
//! Every serializable body starts with a 16 bit kind tag registered
//! here. A tag this build does not know is a fatal scan error, there is
//! no safe way to interpret the bytes that follow.

pub mod index_ops;
pub mod page_ops;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::Mutex;
use vellum_codec::{Decoder, Encoder};

pub use index_ops::{IndexOp, IndexOpKind};
pub use page_ops::{PageOp, PageOpKind, FREE_SLOT};

use crate::error::{WalError, WalResult};
use crate::lsn::Lsn;
use crate::types::OperationId;

/// A record with no payload, usable as an explicit no-op.
pub const KIND_EMPTY: u16 = 1;
/// First record of a logical operation.
pub const KIND_OPERATION_BEGIN: u16 = 2;
/// Last record of a logical operation.
pub const KIND_OPERATION_END: u16 = 3;

/// Bucket slot write.
pub const KIND_BUCKET_VALUE_SET: u16 = 16;
/// Bucket slot removal.
pub const KIND_BUCKET_VALUE_REMOVE: u16 = 17;
/// Page-resident counter adjustment.
pub const KIND_SIZE_COUNTER_CHANGE: u16 = 18;
/// Free list head update.
pub const KIND_FREE_LIST_HEAD_SET: u16 = 19;
/// Directory slot update.
pub const KIND_DIRECTORY_POINTER_SET: u16 = 20;
/// Tree size cell update.
pub const KIND_TREE_SIZE_SET: u16 = 21;

/// Single-value index put.
pub const KIND_INDEX_VALUE_PUT: u16 = 32;
/// Single-value index removal.
pub const KIND_INDEX_VALUE_REMOVE: u16 = 33;
/// Multi-value index entry addition.
pub const KIND_INDEX_ENTRY_ADD: u16 = 34;
/// Multi-value index entry removal.
pub const KIND_INDEX_ENTRY_REMOVE: u16 = 35;

/// What a record says happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// First record of a segment. Never written to disk.
    Start,
    /// Flush batch boundary and fast-forward anchor. Never written to
    /// disk.
    Milestone,
    /// Explicit no-op.
    Empty,
    /// A logical operation begins.
    OperationBegin {
        /// Id of the operation.
        operation_id: OperationId,
    },
    /// A logical operation ends.
    OperationEnd {
        /// Id of the operation.
        operation_id: OperationId,
        /// Whether the operation was rolled back rather than committed.
        rollback: bool,
    },
    /// A page mutation.
    Page(PageOp),
    /// An index change.
    Index(IndexOp),
}

impl RecordBody {
    /// Whether this body reaches disk. Start markers and milestones are
    /// bookkeeping only.
    #[must_use]
    pub fn is_writeable(&self) -> bool {
        !matches!(self, Self::Start | Self::Milestone)
    }

    /// Operation this record belongs to, for bodies that track one.
    #[must_use]
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            Self::OperationBegin { operation_id }
            | Self::OperationEnd { operation_id, .. } => Some(*operation_id),
            Self::Page(op) => Some(op.operation_id),
            Self::Index(op) => Some(op.operation_id),
            Self::Start | Self::Milestone | Self::Empty => None,
        }
    }

    fn tag(&self) -> Option<u16> {
        match self {
            Self::Start | Self::Milestone => None,
            Self::Empty => Some(KIND_EMPTY),
            Self::OperationBegin { .. } => Some(KIND_OPERATION_BEGIN),
            Self::OperationEnd { .. } => Some(KIND_OPERATION_END),
            Self::Page(op) => Some(op.tag()),
            Self::Index(op) => Some(op.tag()),
        }
    }

    fn encode_binary(&self) -> Option<Bytes> {
        let tag = self.tag()?;
        let mut encoder = Encoder::new();
        encoder.write_u16(tag);
        match self {
            Self::Start | Self::Milestone | Self::Empty => {}
            Self::OperationBegin { operation_id } => {
                encoder.write_u32(operation_id.as_u32());
            }
            Self::OperationEnd {
                operation_id,
                rollback,
            } => {
                encoder.write_u32(operation_id.as_u32());
                encoder.write_bool(*rollback);
            }
            Self::Page(op) => op.encode_payload(&mut encoder),
            Self::Index(op) => op.encode_payload(&mut encoder),
        }
        Some(Bytes::from(encoder.into_bytes()))
    }
}

/// Decodes one record entry read back from a segment.
///
/// `lsn` is the position the bytes came from; it only feeds error
/// reporting. The whole slice must belong to the record.
pub fn decode_record(bytes: &[u8], lsn: Lsn) -> WalResult<RecordBody> {
    let mut decoder = Decoder::new(bytes);
    let tag = decoder.read_u16()?;

    let body = match tag {
        KIND_EMPTY => RecordBody::Empty,
        KIND_OPERATION_BEGIN => RecordBody::OperationBegin {
            operation_id: OperationId::new(decoder.read_u32()?),
        },
        KIND_OPERATION_END => RecordBody::OperationEnd {
            operation_id: OperationId::new(decoder.read_u32()?),
            rollback: decoder.read_bool()?,
        },
        KIND_BUCKET_VALUE_SET..=KIND_TREE_SIZE_SET => {
            RecordBody::Page(PageOp::decode_payload(tag, lsn, &mut decoder)?)
        }
        KIND_INDEX_VALUE_PUT..=KIND_INDEX_ENTRY_REMOVE => {
            RecordBody::Index(IndexOp::decode_payload(tag, lsn, &mut decoder)?)
        }
        other => return Err(WalError::unknown_record_kind(other, lsn)),
    };

    decoder.finish()?;
    Ok(body)
}

/// One record travelling through the log.
///
/// Producers create records without a position; positions are assigned
/// lazily by the walk in the manager. The `distance` and `disk_size`
/// cells are written exactly once during that walk, and reading either
/// before assignment is a bug that fails fast.
#[derive(Debug)]
pub struct WalRecord {
    segment: u64,
    body: RecordBody,
    binary_len: u32,
    binary: Mutex<Option<Bytes>>,
    lsn: OnceLock<Lsn>,
    distance: OnceLock<u32>,
    disk_size: OnceLock<u32>,
    written: AtomicBool,
}

impl WalRecord {
    /// Creates a record bound to the segment it will be stored in,
    /// serializing writeable bodies once up front.
    pub(crate) fn new(segment: u64, body: RecordBody) -> Self {
        let binary = body.encode_binary();
        let binary_len = binary.as_ref().map_or(0, |bytes| bytes.len() as u32);
        Self {
            segment,
            body,
            binary_len,
            binary: Mutex::new(binary),
            lsn: OnceLock::new(),
            distance: OnceLock::new(),
            disk_size: OnceLock::new(),
            written: AtomicBool::new(false),
        }
    }

    /// Segment the record belongs to.
    #[must_use]
    pub fn segment(&self) -> u64 {
        self.segment
    }

    /// The record's body.
    #[must_use]
    pub fn body(&self) -> &RecordBody {
        &self.body
    }

    /// Operation the record belongs to, if it tracks one.
    #[must_use]
    pub fn operation_id(&self) -> Option<OperationId> {
        self.body.operation_id()
    }

    /// Serialized content length, zero for bookkeeping-only bodies.
    #[must_use]
    pub fn binary_len(&self) -> u32 {
        self.binary_len
    }

    /// Position of the record, once assigned.
    #[must_use]
    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn.get().copied()
    }

    /// Records since the previous milestone, this record included.
    ///
    /// # Panics
    ///
    /// Panics when read before position assignment.
    #[must_use]
    pub fn distance(&self) -> u32 {
        match self.distance.get() {
            Some(distance) => *distance,
            None => panic!("record distance read before position assignment"),
        }
    }

    /// Log bytes the record accounts for. For milestones this is the
    /// whole span back to the previous milestone.
    ///
    /// # Panics
    ///
    /// Panics when read before position assignment.
    #[must_use]
    pub fn disk_size(&self) -> u32 {
        match self.disk_size.get() {
            Some(disk_size) => *disk_size,
            None => panic!("record disk size read before position assignment"),
        }
    }

    /// Whether the record has reached its segment file.
    #[must_use]
    pub fn is_written(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    pub(crate) fn set_lsn(&self, lsn: Lsn) {
        if self.lsn.set(lsn).is_err() {
            // Concurrent walks compute identical positions.
            debug_assert_eq!(self.lsn.get(), Some(&lsn));
        }
    }

    pub(crate) fn set_distance(&self, distance: u32) {
        if self.distance.set(distance).is_err() {
            debug_assert_eq!(self.distance.get(), Some(&distance));
        }
    }

    pub(crate) fn set_disk_size(&self, disk_size: u32) {
        if self.disk_size.set(disk_size).is_err() {
            debug_assert_eq!(self.disk_size.get(), Some(&disk_size));
        }
    }

    pub(crate) fn mark_written(&self) {
        self.written.store(true, Ordering::Release);
    }

    /// Takes the serialized bytes, leaving the cache empty. The writer
    /// calls this once while draining; afterwards only the length
    /// remains known.
    pub(crate) fn take_binary(&self) -> Option<Bytes> {
        self.binary.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileId, RecordReference};

    #[test]
    fn empty_record_is_just_a_tag() {
        let binary = RecordBody::Empty.encode_binary().unwrap();
        assert_eq!(&binary[..], &KIND_EMPTY.to_le_bytes());
        assert_eq!(
            decode_record(&binary, Lsn::ZERO).unwrap(),
            RecordBody::Empty
        );
    }

    #[test]
    fn begin_and_end_round_trip() {
        let begin = RecordBody::OperationBegin {
            operation_id: OperationId::new(9),
        };
        let binary = begin.encode_binary().unwrap();
        assert_eq!(binary.len(), 2 + 4);
        assert_eq!(decode_record(&binary, Lsn::ZERO).unwrap(), begin);

        let end = RecordBody::OperationEnd {
            operation_id: OperationId::new(9),
            rollback: true,
        };
        let binary = end.encode_binary().unwrap();
        assert_eq!(binary.len(), 2 + 4 + 1);
        assert_eq!(decode_record(&binary, Lsn::ZERO).unwrap(), end);
    }

    #[test]
    fn sentinels_have_no_binary_form() {
        assert!(RecordBody::Start.encode_binary().is_none());
        assert!(RecordBody::Milestone.encode_binary().is_none());

        let record = WalRecord::new(0, RecordBody::Milestone);
        assert_eq!(record.binary_len(), 0);
        assert!(record.take_binary().is_none());
    }

    #[test]
    fn page_record_round_trips_through_the_registry() {
        let body = RecordBody::Page(PageOp {
            operation_id: OperationId::new(4),
            file: FileId::new(1),
            page_index: 77,
            prev_page_lsn: Lsn::new(0, 9),
            kind: PageOpKind::BucketValueSet {
                slot_offset: 16,
                old: 3,
                new: 44,
            },
        });

        let binary = body.encode_binary().unwrap();
        assert_eq!(
            &binary[0..2],
            &KIND_BUCKET_VALUE_SET.to_le_bytes()
        );
        assert_eq!(decode_record(&binary, Lsn::ZERO).unwrap(), body);
    }

    #[test]
    fn index_put_binary_is_tag_plus_payload() {
        let body = RecordBody::Index(IndexOp {
            operation_id: OperationId::new(1),
            index_id: 45,
            key_serializer: 3,
            encryption: None,
            key: Some(b"twelve-bytes".to_vec()),
            kind: IndexOpKind::ValuePut {
                old: None,
                new: RecordReference::new(12, 38),
            },
        });

        let binary = body.encode_binary().unwrap();
        assert_eq!(binary.len(), 42);
        assert_eq!(decode_record(&binary, Lsn::ZERO).unwrap(), body);
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let mut encoder = Encoder::new();
        encoder.write_u16(0x7fff);
        let bytes = encoder.into_bytes();

        let err = decode_record(&bytes, Lsn::new(2, 30)).unwrap_err();
        match err {
            WalError::UnknownRecordKind { tag, lsn } => {
                assert_eq!(tag, 0x7fff);
                assert_eq!(lsn, Lsn::new(2, 30));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut binary = RecordBody::Empty.encode_binary().unwrap().to_vec();
        binary.push(0);
        assert!(decode_record(&binary, Lsn::ZERO).is_err());
    }

    #[test]
    fn lsn_is_set_once() {
        let record = WalRecord::new(3, RecordBody::Empty);
        assert_eq!(record.lsn(), None);

        record.set_lsn(Lsn::new(3, 22));
        assert_eq!(record.lsn(), Some(Lsn::new(3, 22)));

        // A second identical assignment is a no-op.
        record.set_lsn(Lsn::new(3, 22));
        assert_eq!(record.lsn(), Some(Lsn::new(3, 22)));
    }

    #[test]
    #[should_panic(expected = "distance read before")]
    fn distance_read_before_assignment_panics() {
        let record = WalRecord::new(0, RecordBody::Empty);
        let _ = record.distance();
    }

    #[test]
    #[should_panic(expected = "disk size read before")]
    fn disk_size_read_before_assignment_panics() {
        let record = WalRecord::new(0, RecordBody::Milestone);
        let _ = record.disk_size();
    }

    #[test]
    fn bookkeeping_cells_hold_after_assignment() {
        let record = WalRecord::new(0, RecordBody::Empty);
        record.set_distance(4);
        record.set_disk_size(150);
        assert_eq!(record.distance(), 4);
        assert_eq!(record.disk_size(), 150);
    }

    #[test]
    fn binary_cache_is_taken_once() {
        let record = WalRecord::new(0, RecordBody::Empty);
        assert_eq!(record.binary_len(), 2);

        let binary = record.take_binary().unwrap();
        assert_eq!(binary.len(), 2);
        assert!(record.take_binary().is_none());
        // The length stays known after the bytes are gone.
        assert_eq!(record.binary_len(), 2);
    }

    #[test]
    fn written_flag_flips_once() {
        let record = WalRecord::new(0, RecordBody::Empty);
        assert!(!record.is_written());
        record.mark_written();
        assert!(record.is_written());
    }

    #[test]
    fn operation_ids_surface_from_all_tracking_bodies() {
        let id = OperationId::new(11);
        assert_eq!(
            RecordBody::OperationBegin { operation_id: id }.operation_id(),
            Some(id)
        );
        assert_eq!(RecordBody::Empty.operation_id(), None);
        assert_eq!(RecordBody::Milestone.operation_id(), None);

        let page = RecordBody::Page(PageOp {
            operation_id: id,
            file: FileId::new(0),
            page_index: 0,
            prev_page_lsn: Lsn::ZERO,
            kind: PageOpKind::SizeCounterChange {
                counter_offset: 0,
                delta: 1,
            },
        });
        assert_eq!(page.operation_id(), Some(id));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decoding_noise_never_panics(
                bytes in prop::collection::vec(any::<u8>(), 0..160),
            ) {
                let _ = decode_record(&bytes, Lsn::new(3, 50));
            }

            #[test]
            fn truncated_records_fail_cleanly(cut in 1usize..7) {
                let body = RecordBody::OperationEnd {
                    operation_id: OperationId::new(17),
                    rollback: false,
                };
                let binary = body.encode_binary().unwrap();
                prop_assume!(cut <= binary.len());
                let shortened = &binary[..binary.len() - cut];
                prop_assert!(decode_record(shortened, Lsn::ZERO).is_err());
            }
        }
    }
}
