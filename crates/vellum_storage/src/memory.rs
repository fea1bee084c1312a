//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// Stores all data in memory. Suitable for unit tests, crash-replay
/// tests that reopen a "segment" from captured bytes, and ephemeral
/// logs that never need to survive the process.
///
/// # Example
///
/// ```rust
/// use vellum_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"page bytes").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 10);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for replaying recovery against captured segment bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Clears all data from the backend.
    pub fn clear(&mut self) {
        self.data.write().clear();
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing pending in memory
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        // No metadata to sync in memory
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;

        if new_size > size {
            return Err(StorageError::InvalidTruncate { new_size, size });
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}
