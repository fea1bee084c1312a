//! File-based storage backend for persistent segment files.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// One instance owns one segment file. Data survives process restarts.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Thread Safety
///
/// Reads and appends may come from different threads (the recovery
/// scanner reads finished segments while the writer appends to the
/// active one); the file handle is locked around each positioned
/// access.
///
/// # Example
///
/// ```no_run
/// use vellum_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("log_0000000000000001.wal")).unwrap();
/// let offset = backend.append(&[0u8; 4096]).unwrap();
/// backend.sync().unwrap();
/// assert_eq!(offset, 0);
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and appending.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file
    /// cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.lock();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.lock();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::InvalidTruncate {
                new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}
