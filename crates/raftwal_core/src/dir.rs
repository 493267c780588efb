//! Log directory management.
//!
//! ```text
//! <wal_dir>/
//! ├─ LOCK                                   # advisory lock, one writer at a time
//! ├─ 0000000000000000-0000000000000000.wal  # segment seq 0
//! ├─ 0000000000000001-00000000000004d3.wal  # segment seq 1, first index 1235
//! └─ ....wal.tmp                            # segment being created (transient)
//! ```

use crate::error::{WalError, WalResult};
use crate::segment::TEMP_SUFFIX;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// A log directory, optionally holding its exclusive lock.
///
/// The lock is an `fs2` advisory lock on `LOCK`. It is released by
/// [`WalDir::unlock`] or when the value is dropped.
#[derive(Debug)]
pub struct WalDir {
    path: PathBuf,
    lock_file: Option<File>,
}

impl WalDir {
    /// Opens a log directory and takes its exclusive lock.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the directory is missing and `create_if_missing` is false
    /// - `Locked` if another handle holds the lock
    /// - `InvalidArgument` if `path` is not a directory
    pub fn lock(path: &Path, create_if_missing: bool) -> WalResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(WalError::NotFound {
                    path: path.to_path_buf(),
                });
            }
        }
        ensure_dir(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(WalError::Locked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Some(lock_file),
        })
    }

    /// Opens a log directory without locking it, for read-only inspection.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the directory is missing.
    pub fn unlocked(path: &Path) -> WalResult<Self> {
        if !path.exists() {
            return Err(WalError::NotFound {
                path: path.to_path_buf(),
            });
        }
        ensure_dir(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: None,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this handle holds the directory lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_file.is_some()
    }

    /// Releases the lock.
    pub fn unlock(mut self) -> WalResult<()> {
        if let Some(file) = self.lock_file.take() {
            FileExt::unlock(&file)?;
        }
        Ok(())
    }

    /// Fsyncs the directory so created, renamed and removed entries are durable.
    #[cfg(unix)]
    pub fn sync(&self) -> WalResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// NTFS journals metadata; directories cannot be fsynced on Windows.
    #[cfg(not(unix))]
    pub fn sync(&self) -> WalResult<()> {
        Ok(())
    }

    /// Returns true if the directory holds nothing but the lock file and
    /// leftover temporary files.
    pub fn is_fresh(&self) -> WalResult<bool> {
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name != LOCK_FILE && !name.ends_with(TEMP_SUFFIX) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Deletes leftovers of segment creations interrupted by a crash.
    ///
    /// Returns the number of files removed.
    pub fn remove_temp_files(&self) -> WalResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TEMP_SUFFIX) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            self.sync()?;
        }
        Ok(removed)
    }
}

fn ensure_dir(path: &Path) -> WalResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(WalError::invalid_argument(format!(
            "path is not a directory: {}",
            path.display()
        )))
    }
}
