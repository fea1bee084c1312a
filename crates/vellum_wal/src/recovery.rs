//! Crash recovery: replaying the durable log into storage.
//!
//! [`restore`] scans the log once, sorts every operation into
//! committed, rolled back or incomplete, then replays mutations:
//! committed operations are redone in log order, the rest are undone
//! in reverse. Page mutations are gated on the page's stamped
//! position, so replaying is idempotent; a crash during recovery is
//! handled by running recovery again.
//!
//! The caller picks the starting position. It must be no later than
//! the begin record of the oldest operation that was live at the
//! time of the crash; [`LogManager::truncate_before`] keeps segments
//! at least that far back when driven from the live operation table.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::apply::{IndexStorage, PageHandle, PageStore};
use crate::error::{WalError, WalResult};
use crate::log::LogManager;
use crate::lsn::Lsn;
use crate::record::{PageOp, RecordBody};
use crate::types::OperationId;

/// What the log says happened to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Ended with a commit; its mutations are redone.
    Committed,
    /// Ended with a rollback; its mutations are undone.
    RolledBack,
    /// Never ended; the crash cut it short and its mutations are
    /// undone.
    Incomplete,
}

/// Summary of one recovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records the scan yielded.
    pub records_scanned: u64,
    /// Operations whose end record marked a commit.
    pub operations_committed: u64,
    /// Operations whose end record marked a rollback.
    pub operations_rolled_back: u64,
    /// Operations with no end record in the scanned range.
    pub operations_incomplete: u64,
    /// Mutations applied forward.
    pub records_redone: u64,
    /// Mutations reversed.
    pub records_undone: u64,
    /// Position of the last record the scan could read.
    pub last_valid_lsn: Option<Lsn>,
}

/// Replays the log from `from` into the given stores.
///
/// Fails with [`WalError::RecoveryInconsistency`] when the log and the
/// stores contradict each other, for example when a committed mutation
/// targets a file the store never heard of or a cell's content does
/// not match what the log recorded. The error names the record that
/// exposed the mismatch.
pub fn restore(
    manager: &LogManager,
    from: Lsn,
    pages: &mut dyn PageStore,
    indexes: &mut dyn IndexStorage,
) -> WalResult<RecoveryReport> {
    let mut scan = manager.read_from(from)?;
    let mut records: Vec<(Lsn, RecordBody)> = Vec::new();
    let mut dispositions: HashMap<OperationId, Disposition> = HashMap::new();

    while let Some((lsn, body)) = scan.next_record()? {
        if let Some(operation_id) = body.operation_id() {
            if let RecordBody::OperationEnd { rollback, .. } = &body {
                let disposition = if *rollback {
                    Disposition::RolledBack
                } else {
                    Disposition::Committed
                };
                dispositions.insert(operation_id, disposition);
            } else {
                dispositions
                    .entry(operation_id)
                    .or_insert(Disposition::Incomplete);
            }
        }
        records.push((lsn, body));
    }

    let mut report = RecoveryReport {
        records_scanned: records.len() as u64,
        last_valid_lsn: scan.last_valid_lsn(),
        ..RecoveryReport::default()
    };
    for disposition in dispositions.values() {
        match disposition {
            Disposition::Committed => report.operations_committed += 1,
            Disposition::RolledBack => report.operations_rolled_back += 1,
            Disposition::Incomplete => report.operations_incomplete += 1,
        }
    }

    // Redo committed operations in log order.
    for (lsn, body) in &records {
        let committed = body
            .operation_id()
            .is_some_and(|id| dispositions.get(&id) == Some(&Disposition::Committed));
        if !committed {
            continue;
        }
        match body {
            RecordBody::Page(op) => {
                if redo_page(op, *lsn, pages)? {
                    report.records_redone += 1;
                    manager.stats().record_redone();
                }
            }
            RecordBody::Index(op) => {
                // Index storage resolves duplicates itself; there is
                // no per-page stamp to gate on.
                op.redo(indexes, *lsn)?;
                report.records_redone += 1;
                manager.stats().record_redone();
            }
            _ => {}
        }
    }

    // Undo rolled back and incomplete operations, newest record first.
    for (lsn, body) in records.iter().rev() {
        let reverted = body.operation_id().is_some_and(|id| {
            matches!(
                dispositions.get(&id),
                Some(Disposition::RolledBack | Disposition::Incomplete)
            )
        });
        if !reverted {
            continue;
        }
        match body {
            RecordBody::Page(op) => {
                if undo_page(op, *lsn, pages)? {
                    report.records_undone += 1;
                    manager.stats().record_undone();
                }
            }
            RecordBody::Index(op) => {
                op.undo(indexes, *lsn)?;
                report.records_undone += 1;
                manager.stats().record_undone();
            }
            _ => {}
        }
    }

    info!(
        scanned = report.records_scanned,
        committed = report.operations_committed,
        rolled_back = report.operations_rolled_back,
        incomplete = report.operations_incomplete,
        redone = report.records_redone,
        undone = report.records_undone,
        "recovery finished"
    );
    Ok(report)
}

/// Re-applies one page mutation. Returns whether the page changed.
///
/// A page the store never materialized starts out zeroed; a missing
/// file is fatal, since a committed operation can only have touched
/// files that existed.
fn redo_page(op: &PageOp, lsn: Lsn, pages: &mut dyn PageStore) -> WalResult<bool> {
    if !pages.has_file(op.file) {
        return Err(WalError::recovery_inconsistency(
            format!("committed mutation targets unknown {}", op.file),
            lsn,
        ));
    }
    let mut page = match pages.read_page(op.file, op.page_index)? {
        Some(page) => page,
        None => PageHandle::new(pages.page_size()),
    };
    if page.lsn() >= lsn {
        // The mutation reached the page before the crash.
        return Ok(false);
    }
    op.redo(&mut page, lsn)?;
    page.set_lsn(lsn);
    pages.write_page(op.file, op.page_index, &page)?;
    Ok(true)
}

/// Reverses one page mutation. Returns whether the page changed.
///
/// Files or pages the mutation never reached are skipped: an aborted
/// operation may have logged a mutation that was never applied.
fn undo_page(op: &PageOp, lsn: Lsn, pages: &mut dyn PageStore) -> WalResult<bool> {
    if !pages.has_file(op.file) {
        debug!(file = %op.file, record = %lsn, "undo skipped, file is gone");
        return Ok(false);
    }
    let Some(mut page) = pages.read_page(op.file, op.page_index)? else {
        debug!(
            file = %op.file,
            page = op.page_index,
            record = %lsn,
            "undo skipped, page was never written"
        );
        return Ok(false);
    };
    if page.lsn() < lsn {
        // The mutation never reached this copy of the page.
        return Ok(false);
    }
    op.undo(&mut page, lsn)?;
    page.set_lsn(op.prev_page_lsn);
    pages.write_page(op.file, op.page_index, &page)?;
    Ok(true)
}
