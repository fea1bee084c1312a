//! Compensating index operations.
//!
//! Page mutations capture how index trees change physically; these
//! records capture what changed logically, so an operation that rolls
//! back can compensate at the index level without caring which pages
//! the entry landed on. Keys travel as opaque bytes next to the id of
//! the serializer that produced them and the name of the key encryption
//! in force, if any. Absent values are encoded with an explicit
//! presence flag, never as a sentinel.

use vellum_codec::{Decode, Decoder, Encode, Encoder};

use crate::apply::IndexStorage;
use crate::error::{WalError, WalResult};
use crate::lsn::Lsn;
use crate::record::{
    KIND_INDEX_ENTRY_ADD, KIND_INDEX_ENTRY_REMOVE, KIND_INDEX_VALUE_PUT,
    KIND_INDEX_VALUE_REMOVE,
};
use crate::types::{OperationId, RecordReference};

/// One logged index change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOp {
    /// Operation this change belongs to.
    pub operation_id: OperationId,
    /// Index the change applies to.
    pub index_id: u32,
    /// Id of the serializer the key bytes were produced with.
    pub key_serializer: u8,
    /// Name of the key encryption in force, if any.
    pub encryption: Option<String>,
    /// Key the change applies to. `None` is the null key.
    pub key: Option<Vec<u8>>,
    /// The change itself.
    pub kind: IndexOpKind,
}

/// The concrete index changes the log knows how to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOpKind {
    /// Sets the single value under the key.
    ValuePut {
        /// Value found under the key before, if any.
        old: Option<RecordReference>,
        /// Value written.
        new: RecordReference,
    },
    /// Removes the single value under the key.
    ValueRemove {
        /// Value that was removed.
        old: RecordReference,
    },
    /// Adds one entry under a multi-value key.
    EntryAdd {
        /// Entry added.
        value: RecordReference,
    },
    /// Removes one entry from a multi-value key.
    EntryRemove {
        /// Entry removed.
        value: RecordReference,
    },
}

impl IndexOp {
    pub(crate) fn tag(&self) -> u16 {
        match self.kind {
            IndexOpKind::ValuePut { .. } => KIND_INDEX_VALUE_PUT,
            IndexOpKind::ValueRemove { .. } => KIND_INDEX_VALUE_REMOVE,
            IndexOpKind::EntryAdd { .. } => KIND_INDEX_ENTRY_ADD,
            IndexOpKind::EntryRemove { .. } => KIND_INDEX_ENTRY_REMOVE,
        }
    }

    pub(crate) fn encode_payload(&self, encoder: &mut Encoder) {
        encoder.write_u32(self.operation_id.as_u32());
        encoder.write_u32(self.index_id);
        encoder.write_u8(self.key_serializer);
        encoder.write_option_str(self.encryption.as_deref());
        encoder.write_option_bytes(self.key.as_deref());

        match &self.kind {
            IndexOpKind::ValuePut { old, new } => {
                match old {
                    Some(old) => {
                        encoder.write_u8(1);
                        old.encode_into(encoder);
                    }
                    None => encoder.write_u8(0),
                }
                new.encode_into(encoder);
            }
            IndexOpKind::ValueRemove { old } => old.encode_into(encoder),
            IndexOpKind::EntryAdd { value } | IndexOpKind::EntryRemove { value } => {
                value.encode_into(encoder);
            }
        }
    }

    pub(crate) fn decode_payload(
        tag: u16,
        lsn: Lsn,
        decoder: &mut Decoder<'_>,
    ) -> WalResult<Self> {
        let operation_id = OperationId::new(decoder.read_u32()?);
        let index_id = decoder.read_u32()?;
        let key_serializer = decoder.read_u8()?;
        let encryption = decoder.read_option_str()?;
        let key = decoder.read_option_bytes()?;

        let kind = match tag {
            KIND_INDEX_VALUE_PUT => {
                let old = if decoder.read_bool()? {
                    Some(RecordReference::decode_from(decoder)?)
                } else {
                    None
                };
                IndexOpKind::ValuePut {
                    old,
                    new: RecordReference::decode_from(decoder)?,
                }
            }
            KIND_INDEX_VALUE_REMOVE => IndexOpKind::ValueRemove {
                old: RecordReference::decode_from(decoder)?,
            },
            KIND_INDEX_ENTRY_ADD => IndexOpKind::EntryAdd {
                value: RecordReference::decode_from(decoder)?,
            },
            KIND_INDEX_ENTRY_REMOVE => IndexOpKind::EntryRemove {
                value: RecordReference::decode_from(decoder)?,
            },
            other => return Err(WalError::unknown_record_kind(other, lsn)),
        };

        Ok(Self {
            operation_id,
            index_id,
            key_serializer,
            encryption,
            key,
            kind,
        })
    }

    /// Re-applies the change.
    ///
    /// A put that finds its own result is treated as already applied
    /// and skipped; a removal that does not find the recorded entry is
    /// fatal.
    pub fn redo(&self, storage: &mut dyn IndexStorage, lsn: Lsn) -> WalResult<()> {
        let key = self.key.as_deref();
        match &self.kind {
            IndexOpKind::ValuePut { old, new } => {
                let prior = storage.put_value(self.index_id, key, *new)?;
                if prior != *old && prior != Some(*new) {
                    return Err(self.mismatch("put found unexpected prior value", lsn));
                }
                Ok(())
            }
            IndexOpKind::ValueRemove { old } => {
                match storage.remove_value(self.index_id, key)? {
                    Some(found) if found == *old => Ok(()),
                    Some(_) => Err(self.mismatch("removal found unexpected value", lsn)),
                    None => Err(self.mismatch("removal found no entry", lsn)),
                }
            }
            IndexOpKind::EntryAdd { value } => {
                storage.add_entry(self.index_id, key, *value)?;
                Ok(())
            }
            IndexOpKind::EntryRemove { value } => {
                if !storage.remove_entry(self.index_id, key, *value)? {
                    return Err(self.mismatch("removal found no entry", lsn));
                }
                Ok(())
            }
        }
    }

    /// Reverses the change.
    pub fn undo(&self, storage: &mut dyn IndexStorage, lsn: Lsn) -> WalResult<()> {
        let key = self.key.as_deref();
        match &self.kind {
            IndexOpKind::ValuePut { old, new } => match old {
                Some(old) => {
                    let prior = storage.put_value(self.index_id, key, *old)?;
                    if prior != Some(*new) && prior != Some(*old) {
                        return Err(self.mismatch("undo of put found unexpected value", lsn));
                    }
                    Ok(())
                }
                None => match storage.remove_value(self.index_id, key)? {
                    Some(found) if found == *new => Ok(()),
                    // Nothing there: the put was already undone.
                    None => Ok(()),
                    Some(_) => Err(self.mismatch("undo of put found unexpected value", lsn)),
                },
            },
            IndexOpKind::ValueRemove { old } => {
                let prior = storage.put_value(self.index_id, key, *old)?;
                if prior.is_some() && prior != Some(*old) {
                    return Err(self.mismatch("undo of removal found unexpected value", lsn));
                }
                Ok(())
            }
            IndexOpKind::EntryAdd { value } => {
                if !storage.remove_entry(self.index_id, key, *value)? {
                    return Err(self.mismatch("undo of add found no entry", lsn));
                }
                Ok(())
            }
            IndexOpKind::EntryRemove { value } => {
                storage.add_entry(self.index_id, key, *value)?;
                Ok(())
            }
        }
    }

    fn mismatch(&self, what: &str, lsn: Lsn) -> WalError {
        WalError::recovery_inconsistency(
            format!("index {}: {what}", self.index_id),
            lsn,
        )
    }
}
