//! # Vellum Bench
//!
//! Shared helpers for the VellumDB benchmarks. The benchmark binaries
//! under `benches/` import payload builders and log configurations
//! from here so sizes stay comparable across groups.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vellum_wal::{
    FileId, IndexOp, IndexOpKind, Lsn, OperationId, PageOp, PageOpKind, RecordBody,
    RecordReference, WalConfig,
};

const PAYLOAD_SEED: u64 = 0x5EED_CAFE;

/// Deterministic pseudo-random payload of `len` bytes. The same `len`
/// yields the same bytes on every run.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(PAYLOAD_SEED ^ len as u64);
    (0..len).map(|_| rng.gen()).collect()
}

/// Log configuration for benchmarks: segments big enough that rolls
/// never land inside a measurement, no background flushing, no fsync
/// unless the group asks for it.
#[must_use]
pub fn bench_config() -> WalConfig {
    WalConfig::new()
        .max_segment_size(256 * 1024 * 1024)
        .flush_interval(Duration::from_secs(3600))
        .sync_on_flush(false)
}

/// An index change carrying a key of exactly `key_len` bytes.
#[must_use]
pub fn sized_index_record(key_len: usize) -> RecordBody {
    RecordBody::Index(IndexOp {
        operation_id: OperationId::new(1),
        index_id: 7,
        key_serializer: 0,
        encryption: None,
        key: Some(random_bytes(key_len)),
        kind: IndexOpKind::EntryAdd {
            value: RecordReference::new(3, 999),
        },
    })
}

/// A small page mutation, the most common record in real traffic.
#[must_use]
pub fn pointer_record() -> RecordBody {
    RecordBody::Page(PageOp {
        operation_id: OperationId::new(1),
        file: FileId::new(1),
        page_index: 0,
        prev_page_lsn: Lsn::ZERO,
        kind: PageOpKind::DirectoryPointerSet {
            slot_offset: 16,
            old: 0,
            new: 42,
        },
    })
}
