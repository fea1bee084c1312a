//! Log directory handling and the cross-process lock.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{WalError, WalResult};

const LOCK_FILE: &str = "vlog.lock";

/// An open log directory, held exclusively for the lifetime of this
/// value. A second open of the same directory fails with
/// [`WalError::DirectoryLocked`].
#[derive(Debug)]
pub(crate) struct LogDir {
    path: PathBuf,
    _lock_file: File,
}

impl LogDir {
    /// Opens (creating if missing) the directory and takes the lock.
    pub fn open(path: &Path) -> WalResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(WalError::invalid_config(format!(
                "log path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Non-blocking; a held lock means another writer owns the log.
        if lock_file.try_lock_exclusive().is_err() {
            return Err(WalError::DirectoryLocked {
                path: path.display().to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// The lock is released when the file handle closes.
