//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for one VellumDB log segment.
///
/// Storage backends are **opaque byte stores**. They provide simple
/// operations for reading, appending, and flushing data. The log layer
/// owns all format interpretation - backends do not understand pages,
/// records, or checksums.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` ensures all appended data is durable
/// - Backends must be `Send + Sync` so the writer thread can own one
///   while recovery scanners read others
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent segment files
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read starts or ends beyond the current
    /// size, or if an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to durable storage.
    ///
    /// After this returns successfully, all previously appended data
    /// is guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// A stronger guarantee than `flush`: file metadata (size) is also
    /// durable afterwards. The write-ahead contract requires this
    /// before a flushed-position watermark may advance.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// Removes all data after the specified offset. Used to drop a
    /// torn tail found while scanning a segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails or `new_size` exceeds
    /// the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
