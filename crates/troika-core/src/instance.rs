//! Single-instance guard.
//!
//! Exactly one process may own the messenger token. The guard takes an
//! exclusive advisory lock on a PID file before any network connection is
//! opened, so a second instance fails cleanly instead of fighting over the
//! long-poll.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors acquiring the instance lock.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Another process holds the lock.
    #[error("another instance is already running (lock held on {path})")]
    AlreadyRunning {
        /// The contested lock file.
        path: String,
    },

    /// Filesystem trouble opening or writing the lock file.
    #[error("failed to prepare pid file: {0}")]
    Io(#[from] std::io::Error),
}

/// RAII holder of the exclusive PID file lock.
///
/// The lock is released and the file removed on drop.
#[derive(Debug)]
pub struct PidLock {
    file: std::fs::File,
    path: PathBuf,
}

impl PidLock {
    /// Acquire the lock at `path`, writing the current PID into the file.
    ///
    /// # Errors
    ///
    /// [`InstanceError::AlreadyRunning`] if another process holds the
    /// lock; [`InstanceError::Io`] on filesystem failures.
    pub fn acquire(path: &Path) -> Result<Self, InstanceError> {
        use fs2::FileExt;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(InstanceError::AlreadyRunning {
                path: path.display().to_string(),
            });
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // fs2::FileExt::unlock requires the trait in scope.
        let _ = <std::fs::File as fs2::FileExt>::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}
