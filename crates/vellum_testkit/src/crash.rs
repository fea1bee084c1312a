//! Crash simulation.
//!
//! Two flavors. [`CrashableBackend`] wraps a storage backend and stops
//! accepting writes after a byte budget, including a partial final
//! append, which is how a power loss tears a page in half. The file
//! surgery helpers damage segment files on disk directly, for tests
//! that crash a whole log between close and reopen.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use vellum_storage::{StorageBackend, StorageError, StorageResult};
use vellum_wal::log::segment::segment_path;

/// A storage backend that fails after a configured number of written
/// bytes.
///
/// When an append would cross the budget, the backend writes the part
/// that fits, marks itself crashed, and returns an I/O error. Reads
/// keep working afterwards so tests can inspect what actually reached
/// the inner backend.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    crash_after_bytes: u64,
    bytes_written: u64,
    crashed: bool,
    fail_on_sync: bool,
}

impl CrashableBackend {
    /// Wraps a backend with no crash scheduled.
    #[must_use]
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            crash_after_bytes: u64::MAX,
            bytes_written: 0,
            crashed: false,
            fail_on_sync: false,
        }
    }

    /// Schedules a crash once `bytes` have been appended.
    #[must_use]
    pub fn crash_after(mut self, bytes: u64) -> Self {
        self.crash_after_bytes = bytes;
        self
    }

    /// Makes `sync` fail, simulating a device that accepts writes into
    /// its cache but dies before making them durable.
    #[must_use]
    pub fn fail_on_sync(mut self, fail: bool) -> Self {
        self.fail_on_sync = fail;
        self
    }

    /// Whether the simulated crash has happened.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.crashed
    }

    /// Bytes that reached the inner backend.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Clears the crash so the backend accepts writes again, keeping
    /// whatever data made it through.
    pub fn reset(&mut self) {
        self.crashed = false;
        self.crash_after_bytes = u64::MAX;
        self.fail_on_sync = false;
    }

    fn crash_error(&self) -> StorageError {
        StorageError::Io(io::Error::other(format!(
            "simulated crash after {} bytes",
            self.bytes_written
        )))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.crashed {
            return Err(self.crash_error());
        }
        let remaining = self.crash_after_bytes.saturating_sub(self.bytes_written);
        if (data.len() as u64) > remaining {
            // Tear the write: the part inside the budget lands, the
            // rest never reaches the device.
            let kept = usize::try_from(remaining).unwrap_or(usize::MAX);
            if kept > 0 {
                self.inner.append(&data[..kept])?;
                self.bytes_written += kept as u64;
            }
            self.crashed = true;
            return Err(self.crash_error());
        }
        let offset = self.inner.append(data)?;
        self.bytes_written += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.crashed {
            return Err(self.crash_error());
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.crashed {
            return Err(self.crash_error());
        }
        if self.fail_on_sync {
            self.crashed = true;
            return Err(self.crash_error());
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.crashed {
            return Err(self.crash_error());
        }
        self.inner.truncate(new_size)
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("crash_after_bytes", &self.crash_after_bytes)
            .field("bytes_written", &self.bytes_written)
            .field("crashed", &self.crashed)
            .field("fail_on_sync", &self.fail_on_sync)
            .finish_non_exhaustive()
    }
}

/// Cuts `bytes` off the end of a segment file and returns the new
/// length. Simulates a crash that lost the tail of the last write.
///
/// # Errors
///
/// Returns an error if the segment file cannot be opened or resized.
pub fn tear_segment_tail(dir: &Path, segment: u64, bytes: u64) -> io::Result<u64> {
    let file = OpenOptions::new()
        .write(true)
        .open(segment_path(dir, segment))?;
    let len = file.metadata()?.len();
    let new_len = len.saturating_sub(bytes);
    file.set_len(new_len)?;
    file.sync_all()?;
    Ok(new_len)
}

/// Flips one byte in the middle of a page so its checksum no longer
/// matches.
///
/// # Errors
///
/// Returns an error if the page lies outside the segment file or the
/// file cannot be modified.
pub fn corrupt_page(dir: &Path, segment: u64, page_index: u64, page_size: usize) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(segment_path(dir, segment))?;
    let len = file.metadata()?.len();
    let offset = page_index * page_size as u64 + page_size as u64 / 2;
    if offset >= len {
        return Err(io::Error::other(format!(
            "page {page_index} is beyond the segment ({len} bytes)"
        )));
    }
    let mut byte = [0u8];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()?;
    Ok(())
}

/// Appends garbage to a segment file, the shape a torn multi-page
/// write leaves behind.
///
/// # Errors
///
/// Returns an error if the segment file cannot be opened or written.
pub fn append_garbage(dir: &Path, segment: u64, bytes: usize) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(segment_path(dir, segment))?;
    file.write_all(&vec![0xA5; bytes])?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_storage::InMemoryBackend;

    fn crashable() -> CrashableBackend {
        CrashableBackend::new(Box::new(InMemoryBackend::new()))
    }

    #[test]
    fn partial_write_stops_at_the_budget() {
        let mut backend = crashable().crash_after(10);
        backend.append(&[1u8; 6]).unwrap();
        let err = backend.append(&[2u8; 8]).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(backend.has_crashed());

        // Exactly four of the second write's bytes fit the budget.
        assert_eq!(backend.bytes_written(), 10);
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(6, 4).unwrap(), vec![2u8; 4]);
    }

    #[test]
    fn crashed_backend_rejects_every_write() {
        let mut backend = crashable().crash_after(0);
        backend.append(&[0u8; 4]).unwrap_err();
        backend.append(&[0u8; 1]).unwrap_err();
        backend.flush().unwrap_err();
        backend.sync().unwrap_err();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn sync_failure_counts_as_a_crash() {
        let mut backend = crashable().fail_on_sync(true);
        backend.append(&[7u8; 16]).unwrap();
        backend.flush().unwrap();
        backend.sync().unwrap_err();
        assert!(backend.has_crashed());
        backend.append(&[7u8; 1]).unwrap_err();
    }

    #[test]
    fn reset_restores_service() {
        let mut backend = crashable().crash_after(4);
        backend.append(&[3u8; 8]).unwrap_err();
        backend.reset();
        backend.append(&[4u8; 8]).unwrap();
        assert_eq!(backend.bytes_written(), 12);
        assert_eq!(backend.read_at(4, 8).unwrap(), vec![4u8; 8]);
    }

    #[test]
    fn surgery_helpers_edit_segment_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(segment_path(dir.path(), 1), [0u8; 100]).unwrap();

        let new_len = tear_segment_tail(dir.path(), 1, 30).unwrap();
        assert_eq!(new_len, 70);

        append_garbage(dir.path(), 1, 14).unwrap();
        let data = std::fs::read(segment_path(dir.path(), 1)).unwrap();
        assert_eq!(data.len(), 84);
        assert_eq!(data[70], 0xA5);

        corrupt_page(dir.path(), 1, 0, 64).unwrap();
        let data = std::fs::read(segment_path(dir.path(), 1)).unwrap();
        assert_eq!(data[32], 0xFF);

        // Page 2 starts past the end of the file.
        corrupt_page(dir.path(), 1, 2, 64).unwrap_err();
    }
}
