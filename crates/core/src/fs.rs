//! File I/O used by the release probes.
//!
//! Probes talk to the filesystem only through [`ProbeFs`] so the retry and
//! fallback logic can be driven by a fake in tests.

use async_trait::async_trait;
use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait ProbeFs: Send + Sync {
    /// Open `path` for read-write with no sharing permitted and release the
    /// handle before returning. Never modifies content.
    async fn open_exclusive(&self, path: &Path) -> io::Result<()>;

    /// Current size of `path` in bytes.
    async fn file_size(&self, path: &Path) -> io::Result<u64>;
}

/// Why an exclusive open failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    NotFound,
    LockConflict,
    PermissionDenied,
    Other,
}

pub fn classify_open_error(err: &io::Error) -> OpenFailure {
    if is_lock_conflict(err) {
        return OpenFailure::LockConflict;
    }

    match err.kind() {
        io::ErrorKind::NotFound => OpenFailure::NotFound,
        io::ErrorKind::PermissionDenied => OpenFailure::PermissionDenied,
        _ => OpenFailure::Other,
    }
}

#[cfg(windows)]
fn is_lock_conflict(err: &io::Error) -> bool {
    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    matches!(
        err.raw_os_error(),
        Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
    ) || err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(windows))]
fn is_lock_conflict(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// The real filesystem.
///
/// On Windows the open itself is exclusive (`share_mode(0)`). Elsewhere the
/// handle additionally takes a non-blocking exclusive lock, so only writers
/// that lock their files are seen as conflicting.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl StdFs {
    fn open_and_lock(path: &Path) -> io::Result<()> {
        let file = exclusive_options().open(path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            Err(TryLockError::Error(e)) => return Err(e),
        }

        // Closing the handle releases the lock
        drop(file);
        Ok(())
    }
}

#[cfg(windows)]
fn exclusive_options() -> OpenOptions {
    use std::os::windows::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.read(true).write(true).share_mode(0);
    options
}

#[cfg(not(windows))]
fn exclusive_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    options
}

#[async_trait]
impl ProbeFs for StdFs {
    async fn open_exclusive(&self, path: &Path) -> io::Result<()> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_and_lock(&path))
            .await
            .map_err(io::Error::other)?
    }

    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }
}

/// Hold an exclusive handle on `path` the way a well-behaved producer does
/// while writing. Dropping the returned file releases it.
pub fn lock_for_writing(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.lock()?;
    Ok(file)
}
