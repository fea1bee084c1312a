//! Log statistics and telemetry.
//!
//! Counters for monitoring logging throughput, flush behavior and
//! recovery outcomes. All counters are atomic and can be read while
//! records are being logged.

use std::sync::atomic::{AtomicU64, Ordering};

/// Log statistics and metrics.
///
/// Values are monotonically increasing for the lifetime of the log.
#[derive(Debug, Default)]
pub struct WalStats {
    // Logging counters
    /// Total records accepted into the buffer.
    records_logged: AtomicU64,
    /// Total serialized record bytes accepted into the buffer.
    bytes_logged: AtomicU64,
    /// Total milestones appended.
    milestones_logged: AtomicU64,
    /// Total logical operations begun.
    operations_started: AtomicU64,
    /// Total logical operations ended, commits and rollbacks both.
    operations_ended: AtomicU64,

    // Flush counters
    /// Total flush cycles executed by the writer.
    flush_cycles: AtomicU64,
    /// Total pages written to segment files.
    pages_written: AtomicU64,
    /// Total bytes written to segment files, padding included.
    bytes_written: AtomicU64,
    /// Total fsync calls issued.
    syncs: AtomicU64,
    /// Total segments started after the initial one.
    segments_rolled: AtomicU64,

    // Recovery counters
    /// Total records read back during scans.
    records_scanned: AtomicU64,
    /// Total pages rejected as broken during scans.
    broken_pages: AtomicU64,
    /// Total records reapplied during recovery.
    records_redone: AtomicU64,
    /// Total records reverted during recovery.
    records_undone: AtomicU64,
}

impl WalStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    /// Records a logged record and its serialized size.
    pub(crate) fn record_logged(&self, bytes: u64) {
        self.records_logged.fetch_add(1, Ordering::Relaxed);
        self.bytes_logged.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a milestone append.
    pub(crate) fn record_milestone(&self) {
        self.milestones_logged.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an operation begin.
    pub(crate) fn record_operation_start(&self) {
        self.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an operation end.
    pub(crate) fn record_operation_end(&self) {
        self.operations_ended.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one flush cycle with its page and byte volume.
    pub(crate) fn record_flush(&self, pages: u64, bytes: u64) {
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
        self.pages_written.fetch_add(pages, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records an fsync.
    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a segment roll.
    pub(crate) fn record_segment_roll(&self) {
        self.segments_rolled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one record read back from disk.
    pub(crate) fn record_scanned(&self) {
        self.records_scanned.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a page rejected during a scan.
    pub(crate) fn record_broken_page(&self) {
        self.broken_pages.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a record reapplied during recovery.
    pub(crate) fn record_redone(&self) {
        self.records_redone.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a record reverted during recovery.
    pub(crate) fn record_undone(&self) {
        self.records_undone.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the total records accepted into the buffer.
    pub fn records_logged(&self) -> u64 {
        self.records_logged.load(Ordering::Relaxed)
    }

    /// Returns the total serialized record bytes accepted.
    pub fn bytes_logged(&self) -> u64 {
        self.bytes_logged.load(Ordering::Relaxed)
    }

    /// Returns the total milestones appended.
    pub fn milestones_logged(&self) -> u64 {
        self.milestones_logged.load(Ordering::Relaxed)
    }

    /// Returns the total operations begun.
    pub fn operations_started(&self) -> u64 {
        self.operations_started.load(Ordering::Relaxed)
    }

    /// Returns the total operations ended.
    pub fn operations_ended(&self) -> u64 {
        self.operations_ended.load(Ordering::Relaxed)
    }

    /// Returns the total flush cycles executed.
    pub fn flush_cycles(&self) -> u64 {
        self.flush_cycles.load(Ordering::Relaxed)
    }

    /// Returns the total pages written to segments.
    pub fn pages_written(&self) -> u64 {
        self.pages_written.load(Ordering::Relaxed)
    }

    /// Returns the total bytes written to segments.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the total fsync calls issued.
    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Returns the total segments started after the first.
    pub fn segments_rolled(&self) -> u64 {
        self.segments_rolled.load(Ordering::Relaxed)
    }

    /// Returns the total records read back from disk.
    pub fn records_scanned(&self) -> u64 {
        self.records_scanned.load(Ordering::Relaxed)
    }

    /// Returns the total pages rejected as broken.
    pub fn broken_pages(&self) -> u64 {
        self.broken_pages.load(Ordering::Relaxed)
    }

    /// Returns the total records reapplied during recovery.
    pub fn records_redone(&self) -> u64 {
        self.records_redone.load(Ordering::Relaxed)
    }

    /// Returns the total records reverted during recovery.
    pub fn records_undone(&self) -> u64 {
        self.records_undone.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> WalStatsSnapshot {
        WalStatsSnapshot {
            records_logged: self.records_logged(),
            bytes_logged: self.bytes_logged(),
            milestones_logged: self.milestones_logged(),
            operations_started: self.operations_started(),
            operations_ended: self.operations_ended(),
            flush_cycles: self.flush_cycles(),
            pages_written: self.pages_written(),
            bytes_written: self.bytes_written(),
            syncs: self.syncs(),
            segments_rolled: self.segments_rolled(),
            records_scanned: self.records_scanned(),
            broken_pages: self.broken_pages(),
            records_redone: self.records_redone(),
            records_undone: self.records_undone(),
        }
    }
}

/// A point-in-time snapshot of log statistics.
///
/// Unlike [`WalStats`], this is a plain struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalStatsSnapshot {
    /// Total records accepted into the buffer.
    pub records_logged: u64,
    /// Total serialized record bytes accepted.
    pub bytes_logged: u64,
    /// Total milestones appended.
    pub milestones_logged: u64,
    /// Total operations begun.
    pub operations_started: u64,
    /// Total operations ended.
    pub operations_ended: u64,
    /// Total flush cycles executed.
    pub flush_cycles: u64,
    /// Total pages written to segments.
    pub pages_written: u64,
    /// Total bytes written to segments.
    pub bytes_written: u64,
    /// Total fsync calls issued.
    pub syncs: u64,
    /// Total segments started after the first.
    pub segments_rolled: u64,
    /// Total records read back from disk.
    pub records_scanned: u64,
    /// Total pages rejected as broken.
    pub broken_pages: u64,
    /// Total records reapplied during recovery.
    pub records_redone: u64,
    /// Total records reverted during recovery.
    pub records_undone: u64,
}
