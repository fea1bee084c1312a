//! End-to-end recovery checks.
//!
//! [`RecoveryHarness`] runs the full write-ahead contract: every
//! mutation goes to the log first and to a live in-memory store
//! second, the way a storage engine applies changes during normal
//! operation. Tests then crash the log with file surgery, replay it
//! into fresh stores, and compare the result against the state the
//! committed operations built.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use vellum_wal::{
    restore, FileId, IndexOp, IndexOpKind, LogManager, Lsn, MemoryIndexStorage, MemoryPageStore,
    OperationId, PageHandle, PageOp, PageOpKind, PageStore, RecordBody, RecordReference,
    RecoveryReport, WalConfig,
};

use crate::fixtures::{small_config, TestLog};

/// Page size the harness stores use. Small enough that page image
/// comparisons stay cheap.
pub const HARNESS_PAGE_SIZE: usize = 256;

/// A log plus the live stores a storage engine would keep in front of
/// it.
pub struct RecoveryHarness {
    log: TestLog,
    pages: MemoryPageStore,
    indexes: MemoryIndexStorage,
    files: BTreeSet<FileId>,
}

impl RecoveryHarness {
    /// Builds a harness over [`small_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(small_config())
    }

    /// Builds a harness with the given log configuration.
    #[must_use]
    pub fn with_config(config: WalConfig) -> Self {
        Self {
            log: TestLog::with_config(config),
            pages: MemoryPageStore::new(HARNESS_PAGE_SIZE),
            indexes: MemoryIndexStorage::new(),
            files: BTreeSet::new(),
        }
    }

    /// The log under test, for producer threads.
    #[must_use]
    pub fn manager(&self) -> Arc<LogManager> {
        self.log.manager()
    }

    /// Registers a data file with the live store.
    pub fn create_file(&mut self, file: FileId) {
        self.pages.create_file(file);
        self.files.insert(file);
    }

    /// Starts a logical operation.
    pub fn begin(&self) -> OperationId {
        self.log.begin_operation().expect("failed to begin an operation")
    }

    /// Commits an operation and waits for the commit to become
    /// durable.
    pub fn commit(&self, operation_id: OperationId) -> Lsn {
        let lsn = self
            .log
            .end_operation(operation_id, false)
            .expect("failed to end the operation");
        self.log.wait_durable(lsn).expect("failed to wait for durability");
        lsn
    }

    /// Marks an operation rolled back.
    pub fn abort(&self, operation_id: OperationId) -> Lsn {
        self.log
            .end_operation(operation_id, true)
            .expect("failed to end the operation")
    }

    /// Flushes the log.
    pub fn flush(&self) {
        self.log.flush().expect("failed to flush the log");
    }

    /// Logs one directory pointer write, then applies it to the live
    /// page. Log first, page second: the write-ahead contract.
    pub fn set_pointer(
        &mut self,
        operation_id: OperationId,
        file: FileId,
        page_index: u64,
        slot_offset: u16,
        new: u64,
    ) -> Lsn {
        let mut page = self.read_or_fresh(file, page_index);
        let old = page
            .read_u64(usize::from(slot_offset))
            .expect("slot is outside the page");
        let op = PageOp {
            operation_id,
            file,
            page_index,
            prev_page_lsn: page.lsn(),
            kind: PageOpKind::DirectoryPointerSet {
                slot_offset,
                old,
                new,
            },
        };
        let lsn = self
            .log
            .log(RecordBody::Page(op.clone()))
            .expect("failed to log the mutation");
        op.redo(&mut page, lsn).expect("live apply failed");
        page.set_lsn(lsn);
        self.pages
            .write_page(file, page_index, &page)
            .expect("failed to write the live page");
        lsn
    }

    /// Logs one single-value index put, then applies it live.
    pub fn put_index_value(
        &mut self,
        operation_id: OperationId,
        index_id: u32,
        key: Option<Vec<u8>>,
        value: RecordReference,
    ) -> Lsn {
        let old = self.indexes.value(index_id, key.as_deref());
        let op = IndexOp {
            operation_id,
            index_id,
            key_serializer: 0,
            encryption: None,
            key,
            kind: IndexOpKind::ValuePut { old, new: value },
        };
        let lsn = self
            .log
            .log(RecordBody::Index(op.clone()))
            .expect("failed to log the index change");
        op.redo(&mut self.indexes, lsn).expect("live apply failed");
        lsn
    }

    /// One live slot value.
    #[must_use]
    pub fn slot(&mut self, file: FileId, page_index: u64, slot_offset: u16) -> u64 {
        self.read_or_fresh(file, page_index)
            .read_u64(usize::from(slot_offset))
            .expect("slot is outside the page")
    }

    /// Raw bytes of one live page.
    #[must_use]
    pub fn page_image(&mut self, file: FileId, page_index: u64) -> Vec<u8> {
        self.read_or_fresh(file, page_index).into_bytes()
    }

    /// Closes the log, hands the directory to `damage`, reopens.
    pub fn crash_and_restart<F>(&mut self, damage: F)
    where
        F: FnOnce(&Path),
    {
        self.log.reopen_after(damage);
    }

    /// Replays the whole log into fresh stores.
    #[must_use]
    pub fn replay(&self) -> (MemoryPageStore, MemoryIndexStorage, RecoveryReport) {
        let mut pages = MemoryPageStore::new(HARNESS_PAGE_SIZE);
        for file in &self.files {
            pages.create_file(*file);
        }
        let mut indexes = MemoryIndexStorage::new();
        let report = restore(&self.log, self.log.begin_lsn(), &mut pages, &mut indexes)
            .expect("replay failed");
        (pages, indexes, report)
    }

    /// Replays into the live stores, the restart path an engine takes
    /// when its caches survived.
    pub fn replay_into_live(&mut self) -> RecoveryReport {
        let from = self.log.begin_lsn();
        restore(&self.log, from, &mut self.pages, &mut self.indexes).expect("replay failed")
    }

    fn read_or_fresh(&mut self, file: FileId, page_index: u64) -> PageHandle {
        self.pages
            .read_page(file, page_index)
            .expect("failed to read the live page")
            .unwrap_or_else(|| PageHandle::new(HARNESS_PAGE_SIZE))
    }
}

impl Default for RecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecoveryHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryHarness")
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::{append_garbage, tear_segment_tail};
    use vellum_wal::EncryptionConfig;

    #[test]
    fn replay_rebuilds_committed_state() {
        let mut harness = RecoveryHarness::new();
        let directory = FileId::new(4);
        let tree = FileId::new(9);
        harness.create_file(directory);
        harness.create_file(tree);

        let operation = harness.begin();
        harness.set_pointer(operation, directory, 0, 32, 11);
        harness.set_pointer(operation, tree, 2, 48, 22);
        harness.commit(operation);

        let (mut pages, _, report) = harness.replay();
        assert_eq!(report.operations_committed, 1);
        assert_eq!(report.records_redone, 2);

        let replayed = pages.read_page(directory, 0).unwrap().unwrap();
        assert_eq!(replayed.read_u64(32).unwrap(), 11);
        assert_eq!(replayed.as_bytes(), harness.page_image(directory, 0));

        let replayed = pages.read_page(tree, 2).unwrap().unwrap();
        assert_eq!(replayed.read_u64(48).unwrap(), 22);
        assert_eq!(replayed.as_bytes(), harness.page_image(tree, 2));
    }

    #[test]
    fn concurrent_commits_replay_identically() {
        let mut harness = RecoveryHarness::new();
        let left = FileId::new(11);
        let right = FileId::new(12);
        harness.create_file(left);
        harness.create_file(right);

        let mut workers = Vec::new();
        for file in [left, right] {
            let manager = harness.manager();
            workers.push(std::thread::spawn(move || {
                let operation_id = manager.begin_operation().unwrap();
                let mut prev = Lsn::ZERO;
                for value in 1..=20u64 {
                    let op = PageOp {
                        operation_id,
                        file,
                        page_index: 0,
                        prev_page_lsn: prev,
                        kind: PageOpKind::DirectoryPointerSet {
                            slot_offset: 40,
                            old: value - 1,
                            new: value,
                        },
                    };
                    prev = manager.log(RecordBody::Page(op)).unwrap();
                }
                let end = manager.end_operation(operation_id, false).unwrap();
                manager.wait_durable(end).unwrap();
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let (mut first, _, report) = harness.replay();
        let (mut second, _, _) = harness.replay();
        assert_eq!(report.operations_committed, 2);
        assert_eq!(report.records_redone, 40);

        for file in [left, right] {
            let replayed = first.read_page(file, 0).unwrap().unwrap();
            assert_eq!(replayed.read_u64(40).unwrap(), 20);
            let again = second.read_page(file, 0).unwrap().unwrap();
            assert_eq!(again.as_bytes(), replayed.as_bytes());
        }
    }

    #[test]
    fn aborted_and_incomplete_operations_are_undone_everywhere() {
        let mut harness = RecoveryHarness::new();
        let file = FileId::new(5);
        harness.create_file(file);

        let committed = harness.begin();
        harness.set_pointer(committed, file, 0, 64, 7);
        harness.commit(committed);

        let aborted = harness.begin();
        harness.set_pointer(aborted, file, 0, 64, 13);
        harness.abort(aborted);

        let incomplete = harness.begin();
        harness.set_pointer(incomplete, file, 0, 64, 21);
        harness.flush();

        // The live page carries the latest write before replay.
        assert_eq!(harness.slot(file, 0, 64), 21);

        let (mut fresh, _, report) = harness.replay();
        assert_eq!(report.operations_committed, 1);
        assert_eq!(report.operations_rolled_back, 1);
        assert_eq!(report.operations_incomplete, 1);
        let page = fresh.read_page(file, 0).unwrap().unwrap();
        assert_eq!(page.read_u64(64).unwrap(), 7);

        // Replaying into the live store unwinds the page to the same
        // image, byte for byte.
        harness.replay_into_live();
        assert_eq!(harness.page_image(file, 0), page.as_bytes());
    }

    #[test]
    fn torn_tail_loses_only_uncommitted_work() {
        crate::fixtures::init_test_logging();
        let mut harness = RecoveryHarness::new();
        let stable = FileId::new(2);
        let doomed = FileId::new(3);
        harness.create_file(stable);
        harness.create_file(doomed);

        let committed = harness.begin();
        for value in 1..=5u64 {
            harness.set_pointer(committed, stable, 0, 80, value);
        }
        harness.commit(committed);

        // This operation's page never survives the crash.
        let lost = harness.begin();
        harness.set_pointer(lost, doomed, 0, 80, 99);
        harness.crash_and_restart(|dir| {
            tear_segment_tail(dir, 1, 512).unwrap();
        });

        let (mut pages, _, report) = harness.replay();
        assert_eq!(report.operations_committed, 1);
        assert_eq!(report.operations_incomplete, 0);

        let page = pages.read_page(stable, 0).unwrap().unwrap();
        assert_eq!(page.read_u64(80).unwrap(), 5);
        assert!(pages.read_page(doomed, 0).unwrap().is_none());
    }

    #[test]
    fn index_changes_follow_their_operations() {
        let mut harness = RecoveryHarness::new();
        let target = RecordReference::new(4, 400);
        let doomed = RecordReference::new(5, 500);

        let keeper = harness.begin();
        harness.put_index_value(keeper, 1, Some(b"alpha".to_vec()), target);
        harness.commit(keeper);

        let aborted = harness.begin();
        harness.put_index_value(aborted, 1, Some(b"beta".to_vec()), doomed);
        harness.abort(aborted);
        harness.flush();

        let (_, indexes, report) = harness.replay();
        assert_eq!(report.operations_rolled_back, 1);
        assert_eq!(indexes.value(1, Some(b"alpha".as_slice())), Some(target));
        assert_eq!(indexes.value(1, Some(b"beta".as_slice())), None);
    }

    #[test]
    fn encrypted_log_replays_after_a_crash() {
        crate::fixtures::init_test_logging();
        let config = small_config().encryption(EncryptionConfig::new([0x11; 16], [0x22; 16]));
        let mut harness = RecoveryHarness::with_config(config);
        let file = FileId::new(6);
        harness.create_file(file);

        let operation = harness.begin();
        for value in 1..=3u64 {
            harness.set_pointer(operation, file, 0, 96, value);
        }
        harness.commit(operation);

        // Garbage past the last sealed page is discarded on reopen.
        harness.crash_and_restart(|dir| {
            append_garbage(dir, 1, 700).unwrap();
        });

        let (mut pages, _, report) = harness.replay();
        assert_eq!(report.operations_committed, 1);
        let page = pages.read_page(file, 0).unwrap().unwrap();
        assert_eq!(page.read_u64(96).unwrap(), 3);
    }
}
