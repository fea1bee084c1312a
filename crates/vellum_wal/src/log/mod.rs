//! The log manager: appending, flushing and scanning the durable log.
//!
//! [`LogManager`] ties the layers together. Producers log records into
//! the shared [`RecordBuffer`]; positions are assigned lazily by a
//! lock-free backward walk over the buffer; a background writer drains
//! completed batches into page-packed segment files; [`LogScan`] reads
//! durable records back in position order for replay.
//!
//! Flush batches are bounded by milestone records. A flush cycle first
//! appends a milestone, which closes the page it lands behind, then
//! drains every record before it. Batches therefore always cover whole
//! pages, and the milestone's position becomes the durability
//! watermark once the batch is on disk.
//!
//! Segment rolls serialize against appends with a read-write lock:
//! `log` holds it shared while it offers into the current segment, a
//! roll holds it exclusive while it installs the next segment's start
//! record. Rolling appends an empty record afterwards so the fresh
//! segment's first durable page carries the operation id watermark.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use vellum_storage::{FileBackend, StorageBackend};

use crate::buffer::{Cursor, RecordBuffer};
use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::lsn::Lsn;
use crate::page::{self, PageCheck, PageCipher, LENGTH_PREFIX, RECORDS_OFFSET};
use crate::record::{decode_record, RecordBody, WalRecord};
use crate::stats::WalStats;
use crate::types::OperationId;

mod dir;
pub mod segment;

use dir::LogDir;

/// How long a durability waiter sleeps between checks for a stopped
/// writer.
const DURABILITY_WAIT_SLICE: Duration = Duration::from_millis(10);

/// The write-ahead log.
///
/// One instance owns one log directory. Any number of threads may log
/// records concurrently; a single background thread performs the
/// durable writes. All methods take `&self`.
pub struct LogManager {
    config: WalConfig,
    cipher: Option<PageCipher>,
    dir: LogDir,
    stats: Arc<WalStats>,
    buffer: RecordBuffer<WalRecord>,

    /// Held shared by `log`, exclusive by segment rolls.
    segment_lock: RwLock<()>,
    current_segment: AtomicU64,
    /// Segments known to exist, the active one included.
    segments: Mutex<BTreeSet<u64>>,
    /// Position of the latest start or milestone record. Guards
    /// milestone creation and feeds the milestone disk size.
    milestone_anchor: Mutex<Lsn>,

    /// Highest assigned position.
    end: ArcSwap<Lsn>,
    /// Durability watermark: every record strictly below is on disk.
    flushed: Mutex<Lsn>,
    flushed_cond: Condvar,
    /// Serialized bytes logged but not yet written.
    queued_bytes: AtomicU64,

    next_operation_id: AtomicU32,
    /// Latest record position per live operation.
    live_operations: Mutex<HashMap<OperationId, Lsn>>,

    /// State owned by whichever thread runs a flush cycle.
    writer: Mutex<WriterState>,
    wake: Mutex<bool>,
    wake_cond: Condvar,
    writer_failed: AtomicBool,
    writer_failure: Mutex<Option<String>>,

    closed: AtomicBool,
    runtime: Mutex<Option<WriterRuntime>>,
}

impl LogManager {
    /// Opens the log in `path`, creating the directory when missing.
    ///
    /// Existing segments are inspected back to front to find the end
    /// of the valid log; a torn tail left by a crash is discarded with
    /// a warning. Appends always go to a fresh segment, one past the
    /// newest found, so recovered data is never mixed with new
    /// batches.
    pub fn open(path: impl AsRef<Path>, config: WalConfig) -> WalResult<Arc<Self>> {
        config.validate()?;
        let dir = LogDir::open(path.as_ref())?;
        let cipher = config.encryption.as_ref().map(PageCipher::new);

        let known = segment::list_segments(dir.path())?;
        let mut current = 1u64;
        let mut next_operation_id = 1u32;

        if let Some(&tail) = known.last() {
            current = tail + 1;
            let mut backend = segment::open_segment(dir.path(), tail)?;
            let inspection =
                segment::inspect_segment(&backend, tail, config.page_size, cipher.as_ref())?;
            let valid_bytes = inspection.valid_pages * config.page_size as u64;
            let size = backend.size()?;
            if size > valid_bytes {
                warn!(
                    segment = tail,
                    valid_pages = inspection.valid_pages,
                    discarded = size - valid_bytes,
                    last_valid = %Lsn::new(tail, valid_bytes as u32),
                    "discarding torn tail after the last valid page"
                );
                backend.truncate(valid_bytes)?;
                backend.sync()?;
            }
            next_operation_id = inspection.max_operation_id.saturating_add(1);
            if inspection.valid_pages == 0 {
                // The newest segment never got a durable page; the
                // operation id watermark lives in an older one.
                for &older in known.iter().rev().skip(1) {
                    let backend = segment::open_segment(dir.path(), older)?;
                    let inspection = segment::inspect_segment(
                        &backend,
                        older,
                        config.page_size,
                        cipher.as_ref(),
                    )?;
                    if inspection.valid_pages > 0 {
                        next_operation_id = next_operation_id
                            .max(inspection.max_operation_id.saturating_add(1));
                        break;
                    }
                }
            }
        }

        let start = Arc::new(WalRecord::new(current, RecordBody::Start));
        start.set_distance(0);
        start.set_disk_size(RECORDS_OFFSET as u32);
        let start_lsn = Lsn::new(current, RECORDS_OFFSET as u32);
        start.set_lsn(start_lsn);

        let buffer = RecordBuffer::new();
        buffer.offer(start);

        let mut segments: BTreeSet<u64> = known.into_iter().collect();
        segments.insert(current);

        let writer = WriterState::new(
            current,
            config.page_size,
            next_operation_id.saturating_sub(1),
        );

        let manager = Arc::new(Self {
            config,
            cipher,
            dir,
            stats: Arc::new(WalStats::new()),
            buffer,
            segment_lock: RwLock::new(()),
            current_segment: AtomicU64::new(current),
            segments: Mutex::new(segments),
            milestone_anchor: Mutex::new(start_lsn),
            end: ArcSwap::from_pointee(start_lsn),
            flushed: Mutex::new(start_lsn),
            flushed_cond: Condvar::new(),
            queued_bytes: AtomicU64::new(0),
            next_operation_id: AtomicU32::new(next_operation_id),
            live_operations: Mutex::new(HashMap::new()),
            writer: Mutex::new(writer),
            wake: Mutex::new(false),
            wake_cond: Condvar::new(),
            writer_failed: AtomicBool::new(false),
            writer_failure: Mutex::new(None),
            closed: AtomicBool::new(false),
            runtime: Mutex::new(None),
        });

        // The fresh segment's first durable page must carry the
        // operation id watermark even if the caller logs nothing.
        manager.log(RecordBody::Empty)?;

        *manager.runtime.lock() = Some(WriterRuntime::spawn(&manager)?);
        info!(
            path = %manager.dir.path().display(),
            segment = current,
            "write-ahead log opened"
        );
        Ok(manager)
    }

    /// Appends a record and returns its assigned position.
    ///
    /// The record is durable once [`LogManager::flushed_lsn`] passes
    /// the returned position; use [`LogManager::wait_durable`] to
    /// block on that.
    pub fn log(&self, body: RecordBody) -> WalResult<Lsn> {
        self.ensure_running()?;
        if !body.is_writeable() {
            return Err(WalError::invalid_record(
                "start and milestone markers are logged internally",
            ));
        }

        let record = {
            let _guard = self.segment_lock.read();
            let segment = self.current_segment.load(Ordering::Acquire);
            let record = Arc::new(WalRecord::new(segment, body));
            let size = record.binary_len() as usize;
            let max = self.config.max_record_size();
            if size > max {
                return Err(WalError::record_too_large(size, max));
            }
            self.buffer.offer(Arc::clone(&record));
            self.assign_positions();
            record
        };

        let lsn = loop {
            if let Some(lsn) = record.lsn() {
                break lsn;
            }
            // A producer between claim and publish blocks the walk; it
            // finishes within a few instructions.
            thread::yield_now();
            self.assign_positions();
        };

        self.end_max(lsn);
        let disk_size = u64::from(record.disk_size());
        self.queued_bytes.fetch_add(disk_size, Ordering::AcqRel);
        self.stats.record_logged(u64::from(record.binary_len()));

        match record.body() {
            RecordBody::OperationBegin { .. } => self.stats.record_operation_start(),
            RecordBody::OperationEnd { .. } => self.stats.record_operation_end(),
            _ => {}
        }
        if let Some(operation_id) = record.operation_id() {
            let mut live = self.live_operations.lock();
            if matches!(record.body(), RecordBody::OperationEnd { .. }) {
                live.remove(&operation_id);
            } else {
                live.insert(operation_id, lsn);
            }
        }

        if record.distance() == self.config.milestone_interval {
            self.try_append_milestone();
        }

        if u64::from(lsn.position) + disk_size >= self.config.max_segment_size {
            if self.roll_segment_from(record.segment()).is_some() {
                self.log(RecordBody::Empty)?;
            }
        }

        if self.queued_bytes.load(Ordering::Acquire) >= self.config.flush_threshold {
            self.request_flush();
        }

        Ok(lsn)
    }

    /// Starts a logical operation: allocates an id and logs the begin
    /// record.
    pub fn begin_operation(&self) -> WalResult<OperationId> {
        let operation_id =
            OperationId::new(self.next_operation_id.fetch_add(1, Ordering::Relaxed));
        self.log(RecordBody::OperationBegin { operation_id })?;
        Ok(operation_id)
    }

    /// Ends a logical operation. `rollback` marks it as reverted, so
    /// recovery undoes its mutations instead of redoing them.
    ///
    /// Returns the end record's position; waiting for it to become
    /// durable gives a commit its durability guarantee.
    pub fn end_operation(&self, operation_id: OperationId, rollback: bool) -> WalResult<Lsn> {
        self.log(RecordBody::OperationEnd {
            operation_id,
            rollback,
        })
    }

    /// Writes everything logged so far to disk and syncs it.
    pub fn flush(&self) -> WalResult<()> {
        self.ensure_running()?;
        self.flush_cycle(true)
    }

    /// Blocks until `lsn` is durable.
    ///
    /// Fails with [`WalError::WriterStopped`] when the writer died or
    /// the log was closed before the position became durable.
    pub fn wait_durable(&self, lsn: Lsn) -> WalResult<()> {
        {
            let mut flushed = self.flushed.lock();
            loop {
                if *flushed >= lsn {
                    return Ok(());
                }
                if self.writer_failed.load(Ordering::Acquire)
                    || self.closed.load(Ordering::Acquire)
                {
                    break;
                }
                self.request_flush();
                self.flushed_cond
                    .wait_for(&mut flushed, DURABILITY_WAIT_SLICE);
            }
        }
        self.ensure_running()?;
        Ok(())
    }

    /// Position of the oldest record still in the log.
    #[must_use]
    pub fn begin_lsn(&self) -> Lsn {
        let segments = self.segments.lock();
        match segments.iter().next() {
            Some(first) => Lsn::new(*first, RECORDS_OFFSET as u32),
            None => Lsn::ZERO,
        }
    }

    /// Highest assigned position.
    #[must_use]
    pub fn end_lsn(&self) -> Lsn {
        **self.end.load()
    }

    /// Durability watermark. Every record strictly below it is on
    /// disk.
    #[must_use]
    pub fn flushed_lsn(&self) -> Lsn {
        *self.flushed.lock()
    }

    /// Serialized bytes logged but not yet written. Backpressure
    /// policies throttle producers on this gauge.
    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Acquire)
    }

    /// Segment currently receiving new records.
    #[must_use]
    pub fn current_segment(&self) -> u64 {
        self.current_segment.load(Ordering::Acquire)
    }

    /// Segments present in the log, oldest first.
    #[must_use]
    pub fn segments(&self) -> Vec<u64> {
        self.segments.lock().iter().copied().collect()
    }

    /// Live operations and the position of their latest record,
    /// ordered by id. Checkpoint policies must not truncate past the
    /// oldest entry.
    #[must_use]
    pub fn live_operations(&self) -> Vec<(OperationId, Lsn)> {
        let live = self.live_operations.lock();
        let mut items: Vec<_> = live.iter().map(|(id, lsn)| (*id, *lsn)).collect();
        items.sort_by_key(|(id, _)| *id);
        items
    }

    /// Log statistics.
    #[must_use]
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// The configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// The log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Closes the current segment and starts the next one. Returns the
    /// new segment number.
    pub fn roll_segment(&self) -> WalResult<u64> {
        self.ensure_running()?;
        let current = self.current_segment.load(Ordering::Acquire);
        let next = match self.roll_segment_from(current) {
            Some(next) => next,
            // A racing roll already advanced the log.
            None => self.current_segment.load(Ordering::Acquire),
        };
        self.log(RecordBody::Empty)?;
        Ok(next)
    }

    /// Deletes whole segments strictly below `lsn`. The segment
    /// holding `lsn`, the active segment and anything not yet durable
    /// are never touched. Returns how many segments were removed.
    pub fn truncate_before(&self, lsn: Lsn) -> WalResult<u64> {
        let limit = lsn.segment.min(self.flushed_lsn().segment);
        let mut segments = self.segments.lock();
        let targets: Vec<u64> = segments.iter().copied().filter(|s| *s < limit).collect();
        let mut removed = 0u64;
        for segment in targets {
            let path = segment::segment_path(self.dir.path(), segment);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
            segments.remove(&segment);
            removed += 1;
            info!(segment, "dropped segment below checkpoint");
        }
        Ok(removed)
    }

    /// Opens a scan over durable records starting at `lsn`.
    ///
    /// The scan covers what is on disk when it is created; flush
    /// first to include the freshest records. When `lsn` points into
    /// an already truncated segment the scan starts at the oldest
    /// record still present.
    pub fn read_from(&self, lsn: Lsn) -> WalResult<LogScan> {
        let segments: VecDeque<u64> = self
            .segments
            .lock()
            .iter()
            .copied()
            .filter(|segment| *segment >= lsn.segment)
            .collect();
        Ok(LogScan {
            dir: self.dir.path().to_path_buf(),
            page_size: self.config.page_size,
            cipher: self.config.encryption.as_ref().map(PageCipher::new),
            stats: Arc::clone(&self.stats),
            segments,
            current: None,
            start: lsn,
            finished: false,
            last_valid: None,
        })
    }

    /// Stops the writer, flushes everything still queued and syncs.
    /// Idempotent; called by `Drop` when the caller forgets.
    pub fn close(&self) -> WalResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.stop.store(true, Ordering::Release);
            self.request_flush();
            if runtime.handle.thread().id() != thread::current().id()
                && runtime.handle.join().is_err()
            {
                error!("log writer thread panicked");
            }
        }
        let result = self.flush_cycle(true);
        info!(path = %self.dir.path().display(), "write-ahead log closed");
        result
    }

    // === Position assignment ===

    /// Assigns positions to the unassigned run at the buffer's tail.
    ///
    /// Walks backwards from the newest published record to the first
    /// one that already has a position, then assigns forward from it.
    /// Concurrent walks compute identical values, so racing on the
    /// write-once cells is harmless.
    fn assign_positions(&self) {
        let page_size = self.config.page_size;

        let Some(mut cursor) = self.buffer.peek_last() else {
            return;
        };
        let mut pending: Vec<Arc<WalRecord>> = Vec::new();
        loop {
            let record = Arc::clone(cursor.record());
            let assigned = record.lsn().is_some();
            pending.push(record);
            if assigned {
                break;
            }
            match cursor.prev() {
                Some(previous) => cursor = previous,
                // A claimed slot that is not yet published. Its
                // producer's own walk finishes the run; the boundary
                // milestone below the run is never consumed, so an
                // anchor always exists once the slot is visible.
                None => return,
            }
        }

        let mut chain = pending.into_iter().rev();
        let Some(anchor) = chain.next() else {
            return;
        };
        let Some(mut previous_lsn) = anchor.lsn() else {
            return;
        };
        let mut previous = anchor;
        for record in chain {
            let lsn = match record.lsn() {
                Some(lsn) => lsn,
                None => Self::place_after(&previous, previous_lsn, &record, page_size),
            };
            previous = record;
            previous_lsn = lsn;
        }
    }

    /// Computes and stores position, distance and disk size for one
    /// record, given its fully assigned predecessor.
    fn place_after(
        previous: &WalRecord,
        previous_lsn: Lsn,
        record: &WalRecord,
        page_size: usize,
    ) -> Lsn {
        debug_assert_eq!(previous.segment(), record.segment());

        // Start and milestone markers occupy no record bytes; the next
        // record begins where the marker points.
        let end = if previous.body().is_writeable() {
            u64::from(previous_lsn.position) + u64::from(previous.disk_size())
        } else {
            u64::from(previous_lsn.position)
        };

        if matches!(record.body(), RecordBody::Milestone) {
            let position = page::align_to_fresh_page(end, page_size);
            let distance = if previous.body().is_writeable() {
                previous.distance()
            } else {
                0
            };
            record.set_distance(distance);
            // Disk size is the span back to the previous anchor; the
            // milestone appender fills it in under the anchor lock.
            let lsn = Lsn::new(record.segment(), position as u32);
            record.set_lsn(lsn);
            lsn
        } else {
            let position = page::normalize_position(end, page_size);
            let entry_end = page::entry_end(position, record.binary_len() as usize, page_size);
            let disk_size = (page::normalize_position(entry_end, page_size) - position) as u32;
            let distance = if previous.body().is_writeable() {
                previous.distance() + 1
            } else {
                1
            };
            record.set_distance(distance);
            record.set_disk_size(disk_size);
            let lsn = Lsn::new(record.segment(), position as u32);
            record.set_lsn(lsn);
            lsn
        }
    }

    fn end_max(&self, lsn: Lsn) {
        self.end.rcu(|current| {
            if lsn > **current {
                Arc::new(lsn)
            } else {
                Arc::clone(current)
            }
        });
    }

    // === Milestones ===

    /// Appends a milestone for the current segment. The caller must
    /// hold the segment lock in either mode.
    fn append_milestone_locked(&self, anchor: &mut Lsn, segment: u64) -> Arc<WalRecord> {
        let record = Arc::new(WalRecord::new(segment, RecordBody::Milestone));
        self.buffer.offer(Arc::clone(&record));
        let lsn = loop {
            self.assign_positions();
            if let Some(lsn) = record.lsn() {
                break lsn;
            }
            thread::yield_now();
        };
        debug_assert_eq!(lsn.segment, anchor.segment);
        record.set_disk_size(lsn.position.saturating_sub(anchor.position));
        *anchor = lsn;
        self.end_max(lsn);
        self.stats.record_milestone();
        record
    }

    /// Milestone cadence: called by `log` when a record's distance
    /// reaches the configured interval. Skips when another milestone
    /// is already being appended.
    fn try_append_milestone(&self) {
        let _guard = self.segment_lock.read();
        let segment = self.current_segment.load(Ordering::Acquire);
        let Some(mut anchor) = self.milestone_anchor.try_lock() else {
            return;
        };
        self.append_milestone_locked(&mut anchor, segment);
    }

    // === Segment rolls ===

    /// Rolls to the next segment, provided `from_segment` is still the
    /// active one. Returns the new segment number, or `None` when a
    /// racing roll got there first.
    fn roll_segment_from(&self, from_segment: u64) -> Option<u64> {
        let _guard = self.segment_lock.write();
        if self.current_segment.load(Ordering::Acquire) != from_segment {
            return None;
        }

        // Finish assignment for everything already offered; the fresh
        // start record would otherwise cut the walk off from them.
        self.assign_positions();

        let next = from_segment + 1;
        let start = Arc::new(WalRecord::new(next, RecordBody::Start));
        start.set_distance(0);
        start.set_disk_size(RECORDS_OFFSET as u32);
        let lsn = Lsn::new(next, RECORDS_OFFSET as u32);
        start.set_lsn(lsn);
        self.buffer.offer(start);

        self.current_segment.store(next, Ordering::Release);
        self.segments.lock().insert(next);
        *self.milestone_anchor.lock() = lsn;
        self.end_max(lsn);
        self.stats.record_segment_roll();
        debug!(segment = next, "rolled to a new segment");
        Some(next)
    }

    // === Flushing ===

    fn ensure_running(&self) -> WalResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::writer_stopped("log is closed"));
        }
        if self.writer_failed.load(Ordering::Acquire) {
            let message = self
                .writer_failure
                .lock()
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(WalError::writer_stopped(message));
        }
        Ok(())
    }

    fn request_flush(&self) {
        let mut wake = self.wake.lock();
        *wake = true;
        self.wake_cond.notify_one();
    }

    /// Runs one flush cycle: appends a boundary milestone, drains the
    /// buffer up to it and writes the batch as whole pages.
    ///
    /// May run on the background thread or on a caller's thread; the
    /// writer mutex serializes the two.
    fn flush_cycle(&self, sync: bool) -> WalResult<()> {
        let mut writer = self.writer.lock();

        if self.queued_bytes.load(Ordering::Acquire) == 0 && !(sync && writer.unsynced) {
            return Ok(());
        }

        let terminal = {
            let _guard = self.segment_lock.read();
            let segment = self.current_segment.load(Ordering::Acquire);
            let mut anchor = self.milestone_anchor.lock();
            self.append_milestone_locked(&mut anchor, segment)
        };

        let result = self.drain_to(&mut writer, &terminal, sync);
        if let Err(error) = &result {
            self.writer_failed.store(true, Ordering::Release);
            *self.writer_failure.lock() = Some(error.to_string());
            error!(%error, "log writer failed; durability halted");
        }
        result
    }

    /// Drains every record before `terminal` into segment files. The
    /// terminal milestone itself stays queued as the anchor for later
    /// position walks.
    fn drain_to(
        &self,
        writer: &mut WriterState,
        terminal: &Arc<WalRecord>,
        sync: bool,
    ) -> WalResult<()> {
        let mut pages_written = 0u64;
        let mut bytes_written = 0u64;

        loop {
            let Some(head) = self.buffer.peek_first().map(Cursor::into_record) else {
                // The boundary milestone is still queued, so the head
                // slot can only be a producer mid publish.
                thread::yield_now();
                continue;
            };
            if Arc::ptr_eq(&head, terminal) {
                break;
            }
            let Some(record) = self.buffer.poll() else {
                thread::yield_now();
                continue;
            };

            if !record.body().is_writeable() {
                // Start and milestone markers never reach disk.
                continue;
            }

            let Some(lsn) = record.lsn() else {
                return Err(WalError::invalid_state(
                    "unassigned record before the flush boundary",
                ));
            };

            if record.segment() != writer.segment || writer.backend.is_none() {
                self.switch_segment(writer, record.segment(), &mut pages_written, &mut bytes_written)?;
            }

            self.write_record(writer, &record, lsn, &mut pages_written, &mut bytes_written)?;
            self.queued_bytes
                .fetch_sub(u64::from(record.disk_size()), Ordering::AcqRel);
            record.mark_written();
        }

        // The boundary milestone closed the page; write what remains.
        self.finish_page(writer, &mut pages_written, &mut bytes_written)?;

        if let Some(backend) = writer.backend.as_mut() {
            backend.flush()?;
            if sync {
                backend.sync()?;
                writer.unsynced = false;
                self.stats.record_sync();
            } else if bytes_written > 0 {
                writer.unsynced = true;
            }
        }

        if let Some(boundary) = terminal.lsn() {
            let mut flushed = self.flushed.lock();
            if boundary > *flushed {
                *flushed = boundary;
                self.flushed_cond.notify_all();
            }
        }

        if pages_written > 0 {
            self.stats.record_flush(pages_written, bytes_written);
            debug!(
                pages = pages_written,
                bytes = bytes_written,
                "flush cycle written"
            );
        }
        Ok(())
    }

    /// Copies one record entry into the page buffer, sealing and
    /// appending pages as they fill.
    fn write_record(
        &self,
        writer: &mut WriterState,
        record: &WalRecord,
        lsn: Lsn,
        pages: &mut u64,
        bytes: &mut u64,
    ) -> WalResult<()> {
        let page_size = self.config.page_size;

        if let Some(operation_id) = record.operation_id() {
            writer.operation_watermark = writer.operation_watermark.max(operation_id.as_u32());
        }

        // The record's assigned position must match where the writer
        // stands; short tails and milestone gaps are skipped here.
        let expected = u64::from(lsn.position);
        let actual = writer.page_index * page_size as u64 + writer.used as u64;
        if expected != actual {
            if expected < actual {
                return Err(WalError::invalid_state(format!(
                    "record at {lsn} behind writer position {actual}"
                )));
            }
            self.skip_to(writer, expected, pages, bytes)?;
        }

        let content = record.take_binary().unwrap_or_default();
        debug_assert_eq!(content.len() as u32, record.binary_len());
        debug_assert!(page_size - writer.used >= LENGTH_PREFIX);

        writer.page[writer.used..writer.used + LENGTH_PREFIX]
            .copy_from_slice(&(content.len() as u32).to_le_bytes());
        writer.used += LENGTH_PREFIX;

        let mut offset = 0usize;
        while offset < content.len() {
            if writer.used == page_size {
                self.seal_current(writer, pages, bytes)?;
            }
            let step = (page_size - writer.used).min(content.len() - offset);
            writer.page[writer.used..writer.used + step]
                .copy_from_slice(&content[offset..offset + step]);
            writer.used += step;
            offset += step;
        }
        Ok(())
    }

    /// Moves the writer to `target`, which must be the first record
    /// slot of the following page. A partially filled page is sealed
    /// with its tail left as zero padding.
    fn skip_to(
        &self,
        writer: &mut WriterState,
        target: u64,
        pages: &mut u64,
        bytes: &mut u64,
    ) -> WalResult<()> {
        let page_size = self.config.page_size as u64;
        if writer.used > RECORDS_OFFSET {
            self.seal_current(writer, pages, bytes)?;
        }
        if writer.page_index != target / page_size || target % page_size != RECORDS_OFFSET as u64 {
            return Err(WalError::invalid_state(format!(
                "writer cannot reach record position {target} from page {}",
                writer.page_index
            )));
        }
        Ok(())
    }

    /// Seals the current page, appends it to the segment file and
    /// resets the page buffer.
    fn seal_current(
        &self,
        writer: &mut WriterState,
        pages: &mut u64,
        bytes: &mut u64,
    ) -> WalResult<()> {
        let WriterState {
            segment,
            backend,
            page,
            used,
            page_index,
            operation_watermark,
            ..
        } = writer;
        let Some(backend) = backend.as_mut() else {
            return Err(WalError::invalid_state("no segment file open for flush"));
        };
        page::seal_page(
            page,
            *used,
            *operation_watermark,
            *segment,
            *page_index,
            self.cipher.as_ref(),
        );
        backend.append(page)?;
        *pages += 1;
        *bytes += page.len() as u64;
        *page_index += 1;
        *used = RECORDS_OFFSET;
        page.fill(0);
        Ok(())
    }

    fn finish_page(
        &self,
        writer: &mut WriterState,
        pages: &mut u64,
        bytes: &mut u64,
    ) -> WalResult<()> {
        if writer.used > RECORDS_OFFSET {
            self.seal_current(writer, pages, bytes)?;
        }
        Ok(())
    }

    /// Finishes the old segment file and opens the next one. Old
    /// segments are synced before the writer moves on, so everything
    /// below the active segment is always durable.
    fn switch_segment(
        &self,
        writer: &mut WriterState,
        segment: u64,
        pages: &mut u64,
        bytes: &mut u64,
    ) -> WalResult<()> {
        if writer.backend.is_some() {
            self.finish_page(writer, pages, bytes)?;
        }
        if let Some(mut backend) = writer.backend.take() {
            backend.flush()?;
            backend.sync()?;
            self.stats.record_sync();
        }
        let backend = segment::open_segment(self.dir.path(), segment)?;
        writer.backend = Some(backend);
        writer.segment = segment;
        writer.page_index = 0;
        writer.used = RECORDS_OFFSET;
        writer.page.fill(0);
        writer.unsynced = false;
        debug!(segment, "writer moved to segment");
        Ok(())
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Err(error) = self.close() {
                error!(%error, "closing the write-ahead log failed");
            }
        }
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("path", &self.dir.path())
            .field("segment", &self.current_segment.load(Ordering::Relaxed))
            .field("end", &self.end_lsn())
            .field("flushed", &self.flushed_lsn())
            .finish_non_exhaustive()
    }
}

/// Page packing state owned by whichever thread runs a flush cycle.
struct WriterState {
    segment: u64,
    backend: Option<FileBackend>,
    page: Vec<u8>,
    used: usize,
    page_index: u64,
    /// Highest operation id drained so far; stamped on every sealed
    /// page so reopening can resume the id counter.
    operation_watermark: u32,
    /// Bytes were written since the last fsync.
    unsynced: bool,
}

impl WriterState {
    fn new(segment: u64, page_size: usize, operation_watermark: u32) -> Self {
        Self {
            segment,
            backend: None,
            page: vec![0; page_size],
            used: RECORDS_OFFSET,
            page_index: 0,
            operation_watermark,
            unsynced: false,
        }
    }
}

/// Handle to the background writer thread.
struct WriterRuntime {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl WriterRuntime {
    fn spawn(manager: &Arc<LogManager>) -> WalResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let weak = Arc::downgrade(manager);
        let interval = manager.config.flush_interval;
        let sync = manager.config.sync_on_flush;

        let handle = thread::Builder::new()
            .name("vellum-wal-writer".to_string())
            .spawn(move || {
                debug!("log writer started");
                while !thread_stop.load(Ordering::Acquire) {
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    {
                        let mut wake = manager.wake.lock();
                        if !*wake {
                            manager.wake_cond.wait_for(&mut wake, interval);
                        }
                        *wake = false;
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        // Final flush happens on close.
                        break;
                    }
                    if manager.writer_failed.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Err(error) = manager.flush_cycle(sync) {
                        error!(%error, "background flush failed");
                    }
                }
                debug!("log writer stopped");
            })?;

        Ok(Self { stop, handle })
    }
}

/// Which state a page load left the scanner in.
enum PageLoad {
    Loaded,
    /// Past the written portion of the segment.
    Missing,
    /// Failed the magic or checksum test.
    Broken,
}

/// A forward scan over durable records.
///
/// Yields `(position, body)` pairs in position order, starting at the
/// position the scan was opened with. A page that fails validation
/// ends the scan: after a crash the tail of the log is expected to be
/// torn, and everything before it is still good.
pub struct LogScan {
    dir: PathBuf,
    page_size: usize,
    cipher: Option<PageCipher>,
    stats: Arc<WalStats>,
    segments: VecDeque<u64>,
    current: Option<SegmentScanner>,
    start: Lsn,
    finished: bool,
    last_valid: Option<Lsn>,
}

impl LogScan {
    /// Reads the next record, or `None` once the valid log is
    /// exhausted.
    ///
    /// Unknown record kinds and codec failures inside a checksummed
    /// page are fatal; torn pages merely end the scan.
    pub fn next_record(&mut self) -> WalResult<Option<(Lsn, RecordBody)>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let Some(scanner) = self.current.as_mut() else {
                let Some(next) = self.segments.pop_front() else {
                    self.finished = true;
                    return Ok(None);
                };
                let start = if next == self.start.segment {
                    u64::from(self.start.position)
                } else {
                    RECORDS_OFFSET as u64
                };
                self.current = SegmentScanner::open(&self.dir, next, start)?;
                continue;
            };

            let page_size = self.page_size as u64;
            let position = page::normalize_position(scanner.position, self.page_size);
            let page_index = position / page_size;

            match scanner.load_page(page_index, self.page_size, self.cipher.as_ref())? {
                PageLoad::Loaded => {}
                PageLoad::Missing => {
                    self.current = None;
                    continue;
                }
                PageLoad::Broken => {
                    self.stats.record_broken_page();
                    warn!(
                        segment = scanner.segment,
                        page = page_index,
                        last_valid = ?self.last_valid,
                        "scan stopped at a broken page"
                    );
                    self.finished = true;
                    return Ok(None);
                }
            }

            let offset = (position % page_size) as usize;
            if offset >= scanner.used || offset + LENGTH_PREFIX > scanner.used {
                // Padding after the last entry of a batch.
                scanner.position = (page_index + 1) * page_size + RECORDS_OFFSET as u64;
                continue;
            }
            let len = u32::from_le_bytes([
                scanner.page[offset],
                scanner.page[offset + 1],
                scanner.page[offset + 2],
                scanner.page[offset + 3],
            ]) as usize;
            if len == 0 {
                scanner.position = (page_index + 1) * page_size + RECORDS_OFFSET as u64;
                continue;
            }

            scanner.position = position;
            let lsn = Lsn::new(scanner.segment, position as u32);
            let Some(content) =
                scanner.read_entry(len, self.page_size, self.cipher.as_ref())?
            else {
                self.stats.record_broken_page();
                warn!(
                    segment = scanner.segment,
                    lsn = %lsn,
                    "scan stopped inside a torn record"
                );
                self.finished = true;
                return Ok(None);
            };

            let body = decode_record(&content, lsn)?;
            self.stats.record_scanned();
            self.last_valid = Some(lsn);
            return Ok(Some((lsn, body)));
        }
    }

    /// Position of the last record the scan returned.
    #[must_use]
    pub fn last_valid_lsn(&self) -> Option<Lsn> {
        self.last_valid
    }
}

/// Read state for one segment file.
struct SegmentScanner {
    segment: u64,
    backend: FileBackend,
    size: u64,
    /// Next record position to look at.
    position: u64,
    /// Validated, decrypted copy of the current page.
    page: Vec<u8>,
    page_index: u64,
    used: usize,
}

impl SegmentScanner {
    /// Opens a segment for scanning; `None` when the file was already
    /// truncated away.
    fn open(dir: &Path, segment: u64, start: u64) -> WalResult<Option<Self>> {
        let path = segment::segment_path(dir, segment);
        if !path.try_exists()? {
            return Ok(None);
        }
        let backend = segment::open_segment(dir, segment)?;
        let size = backend.size()?;
        Ok(Some(Self {
            segment,
            backend,
            size,
            position: start,
            page: Vec::new(),
            page_index: u64::MAX,
            used: 0,
        }))
    }

    fn load_page(
        &mut self,
        page_index: u64,
        page_size: usize,
        cipher: Option<&PageCipher>,
    ) -> WalResult<PageLoad> {
        if self.page_index == page_index {
            return Ok(PageLoad::Loaded);
        }
        let offset = page_index * page_size as u64;
        if offset + page_size as u64 > self.size {
            return Ok(PageLoad::Missing);
        }
        let mut page = self.backend.read_at(offset, page_size)?;
        match page::check_page(&mut page, self.segment, page_index, cipher)? {
            PageCheck::Valid(info) => {
                self.page = page;
                self.page_index = page_index;
                self.used = info.used;
                Ok(PageLoad::Loaded)
            }
            PageCheck::Broken => Ok(PageLoad::Broken),
        }
    }

    /// Copies one record's content starting at `self.position`, which
    /// must point at its length prefix, and advances past the entry.
    /// `None` means the entry runs past the valid data.
    fn read_entry(
        &mut self,
        len: usize,
        page_size: usize,
        cipher: Option<&PageCipher>,
    ) -> WalResult<Option<Vec<u8>>> {
        let page_size_u64 = page_size as u64;
        let mut content = Vec::with_capacity(len);
        let mut cursor = self.position + LENGTH_PREFIX as u64;
        while content.len() < len {
            let offset = (cursor % page_size_u64) as usize;
            if offset < RECORDS_OFFSET {
                cursor = (cursor / page_size_u64) * page_size_u64 + RECORDS_OFFSET as u64;
                continue;
            }
            let page_index = cursor / page_size_u64;
            match self.load_page(page_index, page_size, cipher)? {
                PageLoad::Loaded => {}
                PageLoad::Missing | PageLoad::Broken => return Ok(None),
            }
            if offset >= self.used {
                return Ok(None);
            }
            let step = (self.used - offset).min(len - content.len());
            content.extend_from_slice(&self.page[offset..offset + step]);
            cursor += step as u64;
        }
        self.position = cursor;
        Ok(Some(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IndexOp, IndexOpKind, PageOp, PageOpKind};
    use crate::types::{FileId, RecordReference};
    use std::time::Instant;

    fn quiet_config() -> WalConfig {
        // A background interval long enough that only explicit flushes
        // move the log, keeping counters deterministic.
        WalConfig::new()
            .page_size(512)
            .max_segment_size(512 * 64)
            .flush_interval(Duration::from_secs(3600))
    }

    fn counter_change(operation_id: u32, delta: i64) -> RecordBody {
        RecordBody::Page(PageOp {
            operation_id: OperationId::new(operation_id),
            file: FileId::new(1),
            page_index: 5,
            prev_page_lsn: Lsn::ZERO,
            kind: PageOpKind::SizeCounterChange {
                counter_offset: 16,
                delta,
            },
        })
    }

    fn collect(manager: &LogManager) -> Vec<(Lsn, RecordBody)> {
        let mut scan = manager.read_from(manager.begin_lsn()).unwrap();
        let mut records = Vec::new();
        while let Some(item) = scan.next_record().unwrap() {
            records.push(item);
        }
        records
    }

    #[test]
    fn open_initializes_watermarks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        assert_eq!(manager.begin_lsn(), Lsn::new(1, RECORDS_OFFSET as u32));
        assert_eq!(manager.current_segment(), 1);
        // The opening empty record shares the start marker's position.
        assert_eq!(manager.end_lsn(), Lsn::new(1, RECORDS_OFFSET as u32));
        manager.close().unwrap();
    }

    #[test]
    fn directory_lock_rejects_second_open() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        match LogManager::open(dir.path(), quiet_config()) {
            Err(WalError::DirectoryLocked { .. }) => {}
            other => panic!("expected DirectoryLocked, got {other:?}"),
        }
        manager.close().unwrap();
    }

    #[test]
    fn log_assigns_increasing_positions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        // The opening empty record sits at offset 22 and spans 6
        // bytes: 4 byte prefix plus the 2 byte kind tag.
        let first = manager.log(RecordBody::Empty).unwrap();
        assert_eq!(first, Lsn::new(1, 28));

        let second = manager.log(RecordBody::Empty).unwrap();
        assert_eq!(second, Lsn::new(1, 34));

        let third = manager.log(counter_change(1, -3)).unwrap();
        assert!(third > second);
        manager.close().unwrap();
    }

    #[test]
    fn flush_advances_the_durability_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        let lsn = manager.log(counter_change(1, 7)).unwrap();
        assert!(manager.flushed_lsn() < lsn);
        assert!(manager.pending_bytes() > 0);

        manager.flush().unwrap();
        assert!(manager.flushed_lsn() > lsn);
        assert_eq!(manager.pending_bytes(), 0);
        manager.wait_durable(lsn).unwrap();

        let backend = segment::open_segment(manager.path(), 1).unwrap();
        let inspection = segment::inspect_segment(&backend, 1, 512, None).unwrap();
        assert!(inspection.valid_pages >= 1);
        manager.close().unwrap();
    }

    #[test]
    fn background_writer_flushes_on_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::new()
            .page_size(512)
            .max_segment_size(512 * 64)
            .flush_interval(Duration::from_millis(20));
        let manager = LogManager::open(dir.path(), config).unwrap();

        let lsn = manager.log(counter_change(1, 1)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while manager.flushed_lsn() < lsn {
            assert!(Instant::now() < deadline, "background flush never ran");
            thread::sleep(Duration::from_millis(10));
        }
        manager.close().unwrap();
    }

    #[test]
    fn scan_replays_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        let bodies = vec![
            counter_change(1, 10),
            counter_change(1, -4),
            RecordBody::Index(IndexOp {
                operation_id: OperationId::new(1),
                index_id: 45,
                key_serializer: 3,
                encryption: None,
                key: Some(vec![9; 12]),
                kind: IndexOpKind::ValuePut {
                    old: None,
                    new: RecordReference::new(12, 38),
                },
            }),
        ];
        let mut logged = Vec::new();
        for body in &bodies {
            logged.push(manager.log(body.clone()).unwrap());
        }
        manager.flush().unwrap();

        let records = collect(&manager);
        // The opening empty record comes first.
        assert_eq!(records.len(), bodies.len() + 1);
        assert_eq!(records[0].1, RecordBody::Empty);
        for (index, body) in bodies.iter().enumerate() {
            assert_eq!(records[index + 1].0, logged[index]);
            assert_eq!(&records[index + 1].1, body);
        }
        manager.close().unwrap();
    }

    #[test]
    fn large_records_span_pages() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        let key = vec![0xabu8; 2000];
        let body = RecordBody::Index(IndexOp {
            operation_id: OperationId::new(1),
            index_id: 7,
            key_serializer: 1,
            encryption: None,
            key: Some(key.clone()),
            kind: IndexOpKind::EntryAdd {
                value: RecordReference::new(3, 99),
            },
        });
        manager.log(body.clone()).unwrap();
        manager.flush().unwrap();

        let backend = segment::open_segment(manager.path(), 1).unwrap();
        assert!(backend.size().unwrap() >= 512 * 4);

        let records = collect(&manager);
        match &records.last().unwrap().1 {
            RecordBody::Index(op) => assert_eq!(op.key.as_deref(), Some(key.as_slice())),
            other => panic!("expected the index record, got {other:?}"),
        }
        manager.close().unwrap();
    }

    #[test]
    fn record_larger_than_a_segment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::new().page_size(512).max_segment_size(512 * 4);
        let manager = LogManager::open(dir.path(), config).unwrap();

        let body = RecordBody::Index(IndexOp {
            operation_id: OperationId::new(1),
            index_id: 1,
            key_serializer: 1,
            encryption: None,
            key: Some(vec![0u8; 4000]),
            kind: IndexOpKind::EntryAdd {
                value: RecordReference::new(1, 1),
            },
        });
        assert!(matches!(
            manager.log(body),
            Err(WalError::RecordTooLarge { .. })
        ));
        manager.close().unwrap();
    }

    #[test]
    fn reopen_resumes_after_the_old_segments() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = LogManager::open(dir.path(), quiet_config()).unwrap();
            let operation = manager.begin_operation().unwrap();
            manager.log(counter_change(operation.as_u32(), 5)).unwrap();
            manager.end_operation(operation, false).unwrap();
            manager.close().unwrap();
        }

        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();
        assert_eq!(manager.current_segment(), 2);
        assert_eq!(manager.begin_lsn().segment, 1);
        // The id counter resumes past the ids in the old segment.
        assert_eq!(manager.begin_operation().unwrap(), OperationId::new(2));

        manager.flush().unwrap();
        let records = collect(&manager);
        assert!(records
            .iter()
            .any(|(_, body)| matches!(body, RecordBody::OperationEnd { rollback: false, .. })));
        manager.close().unwrap();
    }

    #[test]
    fn torn_tail_is_discarded_on_open() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        {
            let manager = LogManager::open(dir.path(), quiet_config()).unwrap();
            manager.log(counter_change(1, 2)).unwrap();
            manager.flush().unwrap();
            manager.close().unwrap();
        }

        let path = segment::segment_path(dir.path(), 1);
        let good_size = std::fs::metadata(&path).unwrap().len();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x5a; 700]).unwrap();
        file.sync_all().unwrap();

        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_size);
        let records = collect(&manager);
        assert!(records
            .iter()
            .any(|(_, body)| matches!(body, RecordBody::Page(_))));
        manager.close().unwrap();
    }

    #[test]
    fn corrupt_page_ends_the_scan_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();
        manager.log(counter_change(1, 1)).unwrap();
        manager.flush().unwrap();
        // The second batch lands on a fresh page.
        manager.log(counter_change(1, 2)).unwrap();
        manager.flush().unwrap();

        // Flip a content byte in the second page behind the log's back.
        let path = segment::segment_path(dir.path(), 1);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[512 + RECORDS_OFFSET] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let records = collect(&manager);
        assert_eq!(
            records
                .iter()
                .filter(|(_, body)| matches!(body, RecordBody::Page(_)))
                .count(),
            1
        );
        assert!(manager.stats().broken_pages() > 0);
        manager.close().unwrap();
    }

    #[test]
    fn roll_segment_moves_new_records() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        manager.log(counter_change(1, 1)).unwrap();
        let next = manager.roll_segment().unwrap();
        assert_eq!(next, 2);
        let lsn = manager.log(counter_change(1, 2)).unwrap();
        assert_eq!(lsn.segment, 2);
        manager.flush().unwrap();

        assert!(segment::segment_path(dir.path(), 1).exists());
        assert!(segment::segment_path(dir.path(), 2).exists());

        let records = collect(&manager);
        let segments: Vec<u64> = records.iter().map(|(lsn, _)| lsn.segment).collect();
        assert!(segments.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(segments.contains(&1) && segments.contains(&2));
        manager.close().unwrap();
    }

    #[test]
    fn segments_roll_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::new()
            .page_size(512)
            .max_segment_size(512 * 4)
            .flush_interval(Duration::from_secs(3600));
        let manager = LogManager::open(dir.path(), config).unwrap();

        for index in 0..120 {
            manager.log(counter_change(1, index)).unwrap();
        }
        assert!(manager.current_segment() > 1);
        manager.flush().unwrap();

        let records = collect(&manager);
        assert_eq!(
            records
                .iter()
                .filter(|(_, body)| matches!(body, RecordBody::Page(_)))
                .count(),
            120
        );
        manager.close().unwrap();
    }

    #[test]
    fn truncate_before_drops_old_segments() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        manager.log(counter_change(1, 1)).unwrap();
        manager.flush().unwrap();
        manager.roll_segment().unwrap();
        manager.log(counter_change(1, 2)).unwrap();
        manager.flush().unwrap();

        let removed = manager.truncate_before(manager.flushed_lsn()).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(manager.begin_lsn().segment, 2);
        assert!(!segment::segment_path(dir.path(), 1).exists());

        let records = collect(&manager);
        assert!(records.iter().all(|(lsn, _)| lsn.segment == 2));
        manager.close().unwrap();
    }

    #[test]
    fn milestone_cadence_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::new()
            .page_size(512)
            .max_segment_size(512 * 64)
            .milestone_interval(4)
            .flush_interval(Duration::from_secs(3600));
        let manager = LogManager::open(dir.path(), config).unwrap();

        // The opening empty record is distance 1; cadence milestones
        // land after the records at distance 4.
        for index in 0..10 {
            manager.log(counter_change(1, index)).unwrap();
        }
        assert_eq!(manager.stats().milestones_logged(), 2);

        manager.flush().unwrap();
        assert_eq!(manager.stats().milestones_logged(), 3);

        // Nothing queued: flushing again appends no boundary.
        manager.flush().unwrap();
        assert_eq!(manager.stats().milestones_logged(), 3);
        manager.close().unwrap();
    }

    #[test]
    fn concurrent_producers_keep_their_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::new()
            .page_size(512)
            .max_segment_size(512 * 256)
            .flush_interval(Duration::from_millis(10));
        let manager = LogManager::open(dir.path(), config).unwrap();

        let threads = 4u32;
        let per_thread = 50i64;
        let mut handles = Vec::new();
        for thread_index in 0..threads {
            let manager = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                for index in 0..per_thread {
                    let delta = i64::from(thread_index) * 1000 + index;
                    manager.log(counter_change(1, delta)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        manager.flush().unwrap();

        let records = collect(&manager);
        let deltas: Vec<i64> = records
            .iter()
            .filter_map(|(_, body)| match body {
                RecordBody::Page(PageOp {
                    kind: PageOpKind::SizeCounterChange { delta, .. },
                    ..
                }) => Some(*delta),
                _ => None,
            })
            .collect();
        assert_eq!(deltas.len(), threads as usize * per_thread as usize);

        for thread_index in 0..threads {
            let base = i64::from(thread_index) * 1000;
            let own: Vec<i64> = deltas
                .iter()
                .copied()
                .filter(|delta| *delta >= base && *delta < base + per_thread)
                .collect();
            let expected: Vec<i64> = (0..per_thread).map(|index| base + index).collect();
            assert_eq!(own, expected, "thread {thread_index} order broken");
        }
        manager.close().unwrap();
    }

    #[test]
    fn live_operations_track_latest_positions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        let first = manager.begin_operation().unwrap();
        let second = manager.begin_operation().unwrap();
        let latest = manager.log(counter_change(first.as_u32(), 1)).unwrap();
        manager.end_operation(second, true).unwrap();

        let live = manager.live_operations();
        assert_eq!(live, vec![(first, latest)]);
        manager.close().unwrap();
    }

    #[test]
    fn encrypted_log_requires_its_key() {
        use crate::config::EncryptionConfig;

        let dir = tempfile::tempdir().unwrap();
        let encryption = EncryptionConfig::new([7; 16], [13; 16]);
        let config = quiet_config().encryption(encryption);
        {
            let manager = LogManager::open(dir.path(), config).unwrap();
            manager.log(counter_change(1, 42)).unwrap();
            manager.flush().unwrap();
            manager.close().unwrap();
        }

        // Reopening without the key fails while inspecting the tail.
        match LogManager::open(dir.path(), quiet_config()) {
            Err(WalError::EncryptionKeyRequired { .. }) => {}
            other => panic!("expected EncryptionKeyRequired, got {other:?}"),
        }

        let encryption = EncryptionConfig::new([7; 16], [13; 16]);
        let manager =
            LogManager::open(dir.path(), quiet_config().encryption(encryption)).unwrap();
        let records = collect(&manager);
        assert!(records
            .iter()
            .any(|(_, body)| matches!(body, RecordBody::Page(_))));
        manager.close().unwrap();
    }

    #[test]
    fn operations_fail_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();
        manager.close().unwrap();

        assert!(matches!(
            manager.log(RecordBody::Empty),
            Err(WalError::WriterStopped { .. })
        ));
        assert!(matches!(
            manager.flush(),
            Err(WalError::WriterStopped { .. })
        ));
        // Closing again is a no-op.
        manager.close().unwrap();
    }

    #[test]
    fn waiters_unblock_when_a_flush_lands() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LogManager::open(dir.path(), quiet_config()).unwrap();

        let lsn = manager.log(counter_change(1, 3)).unwrap();
        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.wait_durable(lsn))
        };
        waiter.join().unwrap().unwrap();
        assert!(manager.flushed_lsn() > lsn);
        manager.close().unwrap();
    }
}
