//! Physical page mutations.
//!
//! Each kind records the minimal delta of one mutation against one
//! data page: the payload offset it touched, the value found there and
//! the value written. Redo re-applies the delta, undo reverses it, and
//! both verify the state they find against the recorded expectation
//! before touching anything. A mismatch means the log and the data
//! files disagree, which replay must not paper over.

use vellum_codec::{CodecResult, Decode, Decoder, Encode, Encoder};

use crate::apply::PageHandle;
use crate::error::{WalError, WalResult};
use crate::lsn::Lsn;
use crate::record::{
    KIND_BUCKET_VALUE_REMOVE, KIND_BUCKET_VALUE_SET, KIND_DIRECTORY_POINTER_SET,
    KIND_FREE_LIST_HEAD_SET, KIND_SIZE_COUNTER_CHANGE, KIND_TREE_SIZE_SET,
};
use crate::types::{FileId, OperationId};

/// Value a removed bucket slot is set to.
pub const FREE_SLOT: u64 = u64::MAX;

/// One logged mutation of one data page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOp {
    /// Operation this mutation belongs to.
    pub operation_id: OperationId,
    /// File holding the page.
    pub file: FileId,
    /// Page index within the file.
    pub page_index: u64,
    /// Position stamped on the page before this mutation ran. Undo
    /// restores it.
    pub prev_page_lsn: Lsn,
    /// The mutation itself.
    pub kind: PageOpKind,
}

/// The concrete page mutations the log knows how to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOpKind {
    /// Stores a value in a bucket slot.
    BucketValueSet {
        /// Payload offset of the slot.
        slot_offset: u16,
        /// Value found in the slot before the write.
        old: u64,
        /// Value written.
        new: u64,
    },
    /// Clears a bucket slot to [`FREE_SLOT`].
    BucketValueRemove {
        /// Payload offset of the slot.
        slot_offset: u16,
        /// Value found in the slot before the removal.
        old: u64,
    },
    /// Adjusts a page-resident size counter by a signed delta.
    SizeCounterChange {
        /// Payload offset of the counter.
        counter_offset: u16,
        /// Amount the counter moved by.
        delta: i64,
    },
    /// Repoints the head of a free list.
    FreeListHeadSet {
        /// Payload offset of the head cell.
        list_offset: u16,
        /// Previous head.
        old: u64,
        /// New head.
        new: u64,
    },
    /// Repoints one directory slot.
    DirectoryPointerSet {
        /// Payload offset of the slot.
        slot_offset: u16,
        /// Previous pointer.
        old: u64,
        /// New pointer.
        new: u64,
    },
    /// Updates the tree size cell of a tree state page.
    TreeSizeSet {
        /// Payload offset of the size cell.
        size_offset: u16,
        /// Previous size.
        old: u64,
        /// New size.
        new: u64,
    },
}

impl PageOp {
    pub(crate) fn tag(&self) -> u16 {
        match self.kind {
            PageOpKind::BucketValueSet { .. } => KIND_BUCKET_VALUE_SET,
            PageOpKind::BucketValueRemove { .. } => KIND_BUCKET_VALUE_REMOVE,
            PageOpKind::SizeCounterChange { .. } => KIND_SIZE_COUNTER_CHANGE,
            PageOpKind::FreeListHeadSet { .. } => KIND_FREE_LIST_HEAD_SET,
            PageOpKind::DirectoryPointerSet { .. } => KIND_DIRECTORY_POINTER_SET,
            PageOpKind::TreeSizeSet { .. } => KIND_TREE_SIZE_SET,
        }
    }

    pub(crate) fn encode_payload(&self, encoder: &mut Encoder) {
        encoder.write_u32(self.operation_id.as_u32());
        encoder.write_u32(self.file.as_u32());
        encoder.write_u64(self.page_index);
        self.prev_page_lsn.encode_into(encoder);

        match self.kind {
            PageOpKind::BucketValueSet {
                slot_offset,
                old,
                new,
            }
            | PageOpKind::FreeListHeadSet {
                list_offset: slot_offset,
                old,
                new,
            }
            | PageOpKind::DirectoryPointerSet {
                slot_offset,
                old,
                new,
            }
            | PageOpKind::TreeSizeSet {
                size_offset: slot_offset,
                old,
                new,
            } => {
                encoder.write_u16(slot_offset);
                encoder.write_u64(old);
                encoder.write_u64(new);
            }
            PageOpKind::BucketValueRemove { slot_offset, old } => {
                encoder.write_u16(slot_offset);
                encoder.write_u64(old);
            }
            PageOpKind::SizeCounterChange {
                counter_offset,
                delta,
            } => {
                encoder.write_u16(counter_offset);
                encoder.write_i64(delta);
            }
        }
    }

    pub(crate) fn decode_payload(
        tag: u16,
        lsn: Lsn,
        decoder: &mut Decoder<'_>,
    ) -> WalResult<Self> {
        let operation_id = OperationId::new(decoder.read_u32()?);
        let file = FileId::new(decoder.read_u32()?);
        let page_index = decoder.read_u64()?;
        let prev_page_lsn = Lsn::decode_from(decoder)?;

        let kind = match tag {
            KIND_BUCKET_VALUE_SET => {
                let (slot_offset, old, new) = decode_set(decoder)?;
                PageOpKind::BucketValueSet {
                    slot_offset,
                    old,
                    new,
                }
            }
            KIND_BUCKET_VALUE_REMOVE => PageOpKind::BucketValueRemove {
                slot_offset: decoder.read_u16()?,
                old: decoder.read_u64()?,
            },
            KIND_SIZE_COUNTER_CHANGE => PageOpKind::SizeCounterChange {
                counter_offset: decoder.read_u16()?,
                delta: decoder.read_i64()?,
            },
            KIND_FREE_LIST_HEAD_SET => {
                let (list_offset, old, new) = decode_set(decoder)?;
                PageOpKind::FreeListHeadSet {
                    list_offset,
                    old,
                    new,
                }
            }
            KIND_DIRECTORY_POINTER_SET => {
                let (slot_offset, old, new) = decode_set(decoder)?;
                PageOpKind::DirectoryPointerSet {
                    slot_offset,
                    old,
                    new,
                }
            }
            KIND_TREE_SIZE_SET => {
                let (size_offset, old, new) = decode_set(decoder)?;
                PageOpKind::TreeSizeSet {
                    size_offset,
                    old,
                    new,
                }
            }
            other => return Err(WalError::unknown_record_kind(other, lsn)),
        };

        Ok(Self {
            operation_id,
            file,
            page_index,
            prev_page_lsn,
            kind,
        })
    }

    /// Re-applies the mutation to a page.
    pub fn redo(&self, page: &mut PageHandle, lsn: Lsn) -> WalResult<()> {
        match self.kind {
            PageOpKind::BucketValueSet {
                slot_offset,
                old,
                new,
            }
            | PageOpKind::FreeListHeadSet {
                list_offset: slot_offset,
                old,
                new,
            }
            | PageOpKind::DirectoryPointerSet {
                slot_offset,
                old,
                new,
            }
            | PageOpKind::TreeSizeSet {
                size_offset: slot_offset,
                old,
                new,
            } => {
                expect_cell(page, slot_offset, old, lsn)?;
                page.write_u64(usize::from(slot_offset), new)
            }
            PageOpKind::BucketValueRemove { slot_offset, old } => {
                expect_cell(page, slot_offset, old, lsn)?;
                page.write_u64(usize::from(slot_offset), FREE_SLOT)
            }
            PageOpKind::SizeCounterChange {
                counter_offset,
                delta,
            } => shift_counter(page, counter_offset, delta, lsn),
        }
    }

    /// Reverses the mutation on a page.
    pub fn undo(&self, page: &mut PageHandle, lsn: Lsn) -> WalResult<()> {
        match self.kind {
            PageOpKind::BucketValueSet {
                slot_offset,
                old,
                new,
            }
            | PageOpKind::FreeListHeadSet {
                list_offset: slot_offset,
                old,
                new,
            }
            | PageOpKind::DirectoryPointerSet {
                slot_offset,
                old,
                new,
            }
            | PageOpKind::TreeSizeSet {
                size_offset: slot_offset,
                old,
                new,
            } => {
                expect_cell(page, slot_offset, new, lsn)?;
                page.write_u64(usize::from(slot_offset), old)
            }
            PageOpKind::BucketValueRemove { slot_offset, old } => {
                expect_cell(page, slot_offset, FREE_SLOT, lsn)?;
                page.write_u64(usize::from(slot_offset), old)
            }
            PageOpKind::SizeCounterChange {
                counter_offset,
                delta,
            } => {
                let Some(reversed) = delta.checked_neg() else {
                    return Err(WalError::recovery_inconsistency(
                        "size counter delta cannot be reversed",
                        lsn,
                    ));
                };
                shift_counter(page, counter_offset, reversed, lsn)
            }
        }
    }
}

fn decode_set(decoder: &mut Decoder<'_>) -> CodecResult<(u16, u64, u64)> {
    Ok((decoder.read_u16()?, decoder.read_u64()?, decoder.read_u64()?))
}

fn expect_cell(page: &PageHandle, offset: u16, expected: u64, lsn: Lsn) -> WalResult<()> {
    let found = page.read_u64(usize::from(offset))?;
    if found != expected {
        return Err(WalError::recovery_inconsistency(
            format!(
                "cell at offset {offset} holds {found:#x}, log recorded {expected:#x}"
            ),
            lsn,
        ));
    }
    Ok(())
}

fn shift_counter(page: &mut PageHandle, offset: u16, delta: i64, lsn: Lsn) -> WalResult<()> {
    let current = page.read_u64(usize::from(offset))?;
    let moved = if delta >= 0 {
        current.checked_add(delta.unsigned_abs())
    } else {
        current.checked_sub(delta.unsigned_abs())
    };
    let Some(moved) = moved else {
        return Err(WalError::recovery_inconsistency(
            format!(
                "size counter at offset {offset} cannot move by {delta} from {current}"
            ),
            lsn,
        ));
    };
    page.write_u64(usize::from(offset), moved)
}
