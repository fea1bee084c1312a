//! Segment files.
//!
//! A log directory holds one file per segment, named by the segment id
//! in fixed-width hex so lexicographic and numeric order agree. Disk
//! space is reclaimed by deleting whole segment files, never by
//! rewriting one.

use std::path::{Path, PathBuf};

use vellum_storage::{FileBackend, StorageBackend};

use crate::error::WalResult;
use crate::page::{self, PageCheck, PageCipher};

const SEGMENT_PREFIX: &str = "vlog_";
const SEGMENT_SUFFIX: &str = ".wal";

/// File name of a segment.
#[must_use]
pub fn segment_file_name(segment: u64) -> String {
    format!("{SEGMENT_PREFIX}{segment:016x}{SEGMENT_SUFFIX}")
}

/// Full path of a segment file inside a log directory.
#[must_use]
pub fn segment_path(dir: &Path, segment: u64) -> PathBuf {
    dir.join(segment_file_name(segment))
}

/// Parses a segment id back out of a file name. Returns `None` for
/// files that are not segments.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if digits.len() != 16 {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Lists the segments present in a directory, oldest first.
pub fn list_segments(dir: &Path) -> WalResult<Vec<u64>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(segment) = parse_segment_file_name(name) {
                segments.push(segment);
            }
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

/// Opens the backend of an existing segment file.
pub fn open_segment(dir: &Path, segment: u64) -> WalResult<FileBackend> {
    Ok(FileBackend::open(&segment_path(dir, segment))?)
}

/// What a sequential page scan of a segment found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInspection {
    /// Pages that validated, counted from the front. Everything after
    /// the first broken page is the torn tail.
    pub valid_pages: u64,
    /// Largest operation id stamped on any valid page.
    pub max_operation_id: u32,
}

/// Walks a segment front to back, validating each page, and reports
/// how much of it is intact.
pub fn inspect_segment(
    backend: &FileBackend,
    segment: u64,
    page_size: usize,
    cipher: Option<&PageCipher>,
) -> WalResult<SegmentInspection> {
    let size = backend.size()?;
    let mut inspection = SegmentInspection {
        valid_pages: 0,
        max_operation_id: 0,
    };

    let mut offset = 0u64;
    while offset + page_size as u64 <= size {
        let mut page = backend.read_at(offset, page_size)?;
        let page_index = offset / page_size as u64;
        match page::check_page(&mut page, segment, page_index, cipher)? {
            PageCheck::Valid(info) => {
                inspection.valid_pages += 1;
                inspection.max_operation_id =
                    inspection.max_operation_id.max(info.last_operation_id);
            }
            PageCheck::Broken => break,
        }
        offset += page_size as u64;
    }

    Ok(inspection)
}
