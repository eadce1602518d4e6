use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::StorageError;

/// Exclusive advisory lock (`flock(2)` on Unix) on a database directory's
/// lock file.
///
/// Only one open database may own a directory at a time. The lock is released
/// when this struct is dropped (the underlying file descriptor is closed).
#[derive(Debug)]
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Try to lock the file at `path` without blocking.
    ///
    /// Creates the lock file if it does not exist. Returns
    /// `StorageError::DirectoryLocked` if another handle holds it.
    pub fn try_exclusive(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| StorageError::DirectoryLocked(path.to_path_buf()))?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
