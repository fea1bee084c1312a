//! Property-based generators for log records.
//!
//! Strategies here produce the writeable record bodies a storage
//! engine would log: operation boundaries, page mutations, and index
//! changes, with realistic field ranges. Property tests across the
//! workspace share the [`PropTestConfig`] presets instead of picking
//! case counts ad hoc.

use proptest::prelude::*;
use vellum_wal::{
    FileId, IndexOp, IndexOpKind, Lsn, OperationId, PageOp, PageOpKind, RecordBody,
    RecordReference,
};

/// Operation ids in a realistic range.
pub fn operation_id_strategy() -> impl Strategy<Value = OperationId> {
    (1u32..10_000).prop_map(OperationId::new)
}

/// File ids a small database would use.
pub fn file_id_strategy() -> impl Strategy<Value = FileId> {
    (1u32..64).prop_map(FileId::new)
}

/// Arbitrary record references.
pub fn record_reference_strategy() -> impl Strategy<Value = RecordReference> {
    (0u32..1_000, 0u64..1_000_000).prop_map(|(collection, position)| {
        RecordReference::new(collection, position)
    })
}

/// Log positions, including the zero position a fresh page carries.
pub fn lsn_strategy() -> impl Strategy<Value = Lsn> {
    prop_oneof![
        1 => Just(Lsn::ZERO),
        4 => (1u64..100, 22u32..1_000_000).prop_map(|(segment, position)| {
            Lsn::new(segment, position)
        }),
    ]
}

/// One of every page mutation kind.
pub fn page_op_kind_strategy() -> impl Strategy<Value = PageOpKind> {
    prop_oneof![
        (0u16..1_000, any::<u64>(), any::<u64>()).prop_map(|(slot_offset, old, new)| {
            PageOpKind::BucketValueSet {
                slot_offset,
                old,
                new,
            }
        }),
        (0u16..1_000, any::<u64>()).prop_map(|(slot_offset, old)| {
            PageOpKind::BucketValueRemove { slot_offset, old }
        }),
        (0u16..1_000, -1_000i64..1_000).prop_map(|(counter_offset, delta)| {
            PageOpKind::SizeCounterChange {
                counter_offset,
                delta,
            }
        }),
        (0u16..1_000, any::<u64>(), any::<u64>()).prop_map(|(list_offset, old, new)| {
            PageOpKind::FreeListHeadSet {
                list_offset,
                old,
                new,
            }
        }),
        (0u16..1_000, any::<u64>(), any::<u64>()).prop_map(|(slot_offset, old, new)| {
            PageOpKind::DirectoryPointerSet {
                slot_offset,
                old,
                new,
            }
        }),
        (0u16..1_000, any::<u64>(), any::<u64>()).prop_map(|(size_offset, old, new)| {
            PageOpKind::TreeSizeSet {
                size_offset,
                old,
                new,
            }
        }),
    ]
}

/// Complete page mutations.
pub fn page_op_strategy() -> impl Strategy<Value = PageOp> {
    (
        operation_id_strategy(),
        file_id_strategy(),
        0u64..1_024,
        lsn_strategy(),
        page_op_kind_strategy(),
    )
        .prop_map(|(operation_id, file, page_index, prev_page_lsn, kind)| PageOp {
            operation_id,
            file,
            page_index,
            prev_page_lsn,
            kind,
        })
}

/// Index keys, including the null key.
pub fn key_strategy() -> impl Strategy<Value = Option<Vec<u8>>> {
    prop::option::of(prop::collection::vec(any::<u8>(), 0..64))
}

/// One of every index change kind.
pub fn index_op_kind_strategy() -> impl Strategy<Value = IndexOpKind> {
    prop_oneof![
        (
            prop::option::of(record_reference_strategy()),
            record_reference_strategy(),
        )
            .prop_map(|(old, new)| IndexOpKind::ValuePut { old, new }),
        record_reference_strategy().prop_map(|old| IndexOpKind::ValueRemove { old }),
        record_reference_strategy().prop_map(|value| IndexOpKind::EntryAdd { value }),
        record_reference_strategy().prop_map(|value| IndexOpKind::EntryRemove { value }),
    ]
}

/// Complete index changes.
pub fn index_op_strategy() -> impl Strategy<Value = IndexOp> {
    (
        operation_id_strategy(),
        1u32..128,
        any::<u8>(),
        prop::option::of("[a-z]{3,12}"),
        key_strategy(),
        index_op_kind_strategy(),
    )
        .prop_map(
            |(operation_id, index_id, key_serializer, encryption, key, kind)| IndexOp {
                operation_id,
                index_id,
                key_serializer,
                encryption,
                key,
                kind,
            },
        )
}

/// Writeable record bodies, weighted towards page and index changes
/// the way real traffic is.
pub fn record_body_strategy() -> impl Strategy<Value = RecordBody> {
    prop_oneof![
        1 => Just(RecordBody::Empty),
        2 => operation_id_strategy().prop_map(|operation_id| RecordBody::OperationBegin {
            operation_id,
        }),
        2 => (operation_id_strategy(), any::<bool>()).prop_map(|(operation_id, rollback)| {
            RecordBody::OperationEnd {
                operation_id,
                rollback,
            }
        }),
        5 => page_op_strategy().prop_map(RecordBody::Page),
        5 => index_op_strategy().prop_map(RecordBody::Index),
    ]
}

/// Shared proptest tuning so property tests across the workspace run
/// with consistent budgets.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of cases each property runs.
    pub cases: u32,
    /// Iteration budget for shrinking a failing case.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1_000,
        }
    }
}

impl PropTestConfig {
    /// Fast preset for tests that open a real log per case.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Exhaustive preset for nightly or pre-release runs.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1_024,
            max_shrink_iters: 10_000,
        }
    }

    /// Converts to the proptest configuration type.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
