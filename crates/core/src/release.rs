//! Per-file release probe.
//!
//! A file is released when it can be opened exclusively: no other process
//! still holds a conflicting handle. Lock conflicts are retried under the
//! configured [`RetryPolicy`]; a permission error switches that file to the
//! size-stability fallback in [`crate::stable`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::fs::{classify_open_error, OpenFailure, ProbeFs};
use crate::observer::{DetectionEvent, DetectionObserver, NoopObserver};
use crate::retry::RetryPolicy;
use crate::stable::check_stability;

/// Classification of one candidate file in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Released,
    /// Still held by another process after every retry.
    Locked,
    /// Gone between listing and probing.
    Missing,
    /// Fallback size check saw a change or could not read the size.
    Unsettled,
    /// Unexpected I/O error.
    Failed,
    /// Session cancelled mid-probe.
    Cancelled,
}

impl FileStatus {
    pub fn is_released(self) -> bool {
        self == FileStatus::Released
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileStatus::Released => "released",
            FileStatus::Locked => "locked",
            FileStatus::Missing => "missing",
            FileStatus::Unsettled => "unsettled",
            FileStatus::Failed => "failed",
            FileStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

pub struct ReleaseProbe<F> {
    fs: F,
    retry: RetryPolicy,
    size_probe_interval: Duration,
    observer: Arc<dyn DetectionObserver>,
}

impl<F: ProbeFs> ReleaseProbe<F> {
    pub fn new(fs: F, retry: RetryPolicy, size_probe_interval: Duration) -> Self {
        Self {
            fs,
            retry,
            size_probe_interval,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DetectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Classify `path`. Never fails: every error maps to a not-released
    /// status.
    pub async fn probe(&self, path: &Path, cancel: &CancelToken) -> FileStatus {
        for attempt in self.retry.attempts() {
            if cancel.is_cancelled() {
                return FileStatus::Cancelled;
            }

            let err = match self.fs.open_exclusive(path).await {
                Ok(()) => return FileStatus::Released,
                Err(e) => e,
            };

            match classify_open_error(&err) {
                OpenFailure::NotFound => return FileStatus::Missing,
                OpenFailure::PermissionDenied => {
                    self.observer
                        .on_event(&DetectionEvent::PermissionFallback { path });
                    return self.probe_size(path, cancel).await;
                }
                OpenFailure::LockConflict => {
                    self.observer.on_event(&DetectionEvent::LockConflict {
                        path,
                        attempt,
                        max_attempts: self.retry.max_attempts(),
                    });
                }
                OpenFailure::Other => {
                    self.observer.on_event(&DetectionEvent::ProbeError {
                        path,
                        error: err.to_string(),
                    });
                    return FileStatus::Failed;
                }
            }

            if self.retry.is_last(attempt) {
                break;
            }
            if !cancel.sleep(self.retry.delay()).await {
                return FileStatus::Cancelled;
            }
        }

        FileStatus::Locked
    }

    async fn probe_size(&self, path: &Path, cancel: &CancelToken) -> FileStatus {
        match check_stability(&self.fs, path, self.size_probe_interval, cancel).await {
            Ok(true) => FileStatus::Released,
            Ok(false) if cancel.is_cancelled() => FileStatus::Cancelled,
            Ok(false) => {
                self.observer.on_event(&DetectionEvent::SizeChanged { path });
                FileStatus::Unsettled
            }
            Err(e) => {
                self.observer.on_event(&DetectionEvent::ProbeError {
                    path,
                    error: format!("{:#}", e),
                });
                FileStatus::Unsettled
            }
        }
    }
}
