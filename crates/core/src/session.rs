//! Batch stability loop.
//!
//! A [`DetectionSession`] scans the target directory every poll interval,
//! probes each candidate, and tracks how many consecutive cycles passed
//! without a newly released file. Once that count reaches the configured
//! threshold with at least one released file, the batch is ready.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::{validate_config, DetectorConfig};
use crate::error::DetectorError;
use crate::fs::{ProbeFs, StdFs};
use crate::observer::{DetectionEvent, DetectionObserver, TracingObserver};
use crate::release::{FileStatus, ReleaseProbe};
use crate::report::DetectionReport;
use crate::scan::list_candidates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Ready,
    TimedOut,
    Cancelled,
}

/// How a session ended. Only `Ready` means the batch is complete; the other
/// two carry the last remembered snapshot, possibly empty, for the caller to
/// judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "files", rename_all = "snake_case")]
pub enum DetectionOutcome {
    Ready(Vec<PathBuf>),
    TimedOut(Vec<PathBuf>),
    Cancelled(Vec<PathBuf>),
}

impl DetectionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            DetectionOutcome::Ready(_) => OutcomeKind::Ready,
            DetectionOutcome::TimedOut(_) => OutcomeKind::TimedOut,
            DetectionOutcome::Cancelled(_) => OutcomeKind::Cancelled,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DetectionOutcome::Ready(_))
    }

    pub fn files(&self) -> &[PathBuf] {
        match self {
            DetectionOutcome::Ready(files)
            | DetectionOutcome::TimedOut(files)
            | DetectionOutcome::Cancelled(files) => files,
        }
    }

    pub fn into_files(self) -> Vec<PathBuf> {
        match self {
            DetectionOutcome::Ready(files)
            | DetectionOutcome::TimedOut(files)
            | DetectionOutcome::Cancelled(files) => files,
        }
    }
}

/// Result of comparing one snapshot with the remembered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// The snapshot held `new_files` paths not seen before; counter reset.
    Grew { new_files: usize },
    /// Nothing new; counter now at `stable_cycles`.
    Unchanged { stable_cycles: u32 },
}

/// Compare-and-count state of the stability loop, free of any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityTracker {
    required: u32,
    stable_cycles: u32,
    remembered: BTreeSet<PathBuf>,
}

impl StabilityTracker {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            stable_cycles: 0,
            remembered: BTreeSet::new(),
        }
    }

    /// Feed the snapshot of one cycle.
    ///
    /// A path absent from the remembered snapshot resets the counter and
    /// replaces the remembered snapshot. Otherwise the counter advances,
    /// saturating at the threshold. Paths that disappeared do not count as
    /// growth.
    pub fn observe(&mut self, snapshot: &BTreeSet<PathBuf>) -> Comparison {
        let new_files = snapshot.difference(&self.remembered).count();
        if new_files > 0 {
            self.stable_cycles = 0;
            self.remembered = snapshot.clone();
            Comparison::Grew { new_files }
        } else {
            self.stable_cycles = (self.stable_cycles + 1).min(self.required);
            Comparison::Unchanged {
                stable_cycles: self.stable_cycles,
            }
        }
    }

    /// Ready when the counter is at the threshold and `snapshot` is
    /// non-empty. An empty directory is never a ready batch.
    pub fn is_ready(&self, snapshot: &BTreeSet<PathBuf>) -> bool {
        self.stable_cycles >= self.required && !snapshot.is_empty()
    }

    pub fn stable_cycles(&self) -> u32 {
        self.stable_cycles
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn remembered(&self) -> &BTreeSet<PathBuf> {
        &self.remembered
    }
}

/// One scan-and-probe pass over the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleScan {
    pub statuses: BTreeMap<PathBuf, FileStatus>,
    pub released: BTreeSet<PathBuf>,
}

/// One wait-for-ready invocation. Consumed by [`DetectionSession::wait_for_ready`].
pub struct DetectionSession<F = StdFs> {
    directory: PathBuf,
    config: DetectorConfig,
    probe: ReleaseProbe<F>,
    observer: Arc<dyn DetectionObserver>,
    cancel: CancelToken,
}

impl DetectionSession<StdFs> {
    pub fn new(
        directory: impl Into<PathBuf>,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        Self::with_fs(directory, config, StdFs)
    }
}

impl<F: ProbeFs> DetectionSession<F> {
    pub fn with_fs(
        directory: impl Into<PathBuf>,
        config: DetectorConfig,
        fs: F,
    ) -> Result<Self, DetectorError> {
        validate_config(&config).map_err(|e| DetectorError::InvalidConfig(e.to_string()))?;

        let observer: Arc<dyn DetectionObserver> = Arc::new(TracingObserver);
        let probe = ReleaseProbe::new(fs, config.retry_policy(), config.size_probe_interval())
            .with_observer(observer.clone());

        Ok(Self {
            directory: directory.into(),
            config,
            probe,
            observer,
            cancel: CancelToken::never(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn DetectionObserver>) -> Self {
        self.probe = self.probe.with_observer(observer.clone());
        self.observer = observer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// List and probe every candidate once. A directory that cannot be
    /// enumerated yields an empty scan.
    pub async fn scan_once(&self) -> CycleScan {
        let candidates = match list_candidates(&self.directory, &self.config.file_suffix) {
            Ok(candidates) => candidates,
            Err(e) => {
                self.observer.on_event(&DetectionEvent::ScanFailed {
                    dir: &self.directory,
                    error: format!("{:#}", e),
                });
                return CycleScan::default();
            }
        };

        let mut scan = CycleScan::default();
        for path in candidates {
            if self.cancel.is_cancelled() {
                break;
            }
            let status = self.probe.probe(&path, &self.cancel).await;
            if status.is_released() {
                scan.released.insert(path.clone());
            }
            scan.statuses.insert(path, status);
        }
        scan
    }

    /// Poll until the batch is stable, the wait budget runs out, or the
    /// cancel token fires.
    pub async fn wait_for_ready(self) -> DetectionReport {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        let max_cycles = self.config.max_cycles();
        let mut tracker = StabilityTracker::new(self.config.stable_cycles);
        let mut cycles = 0;

        debug!(
            %session_id,
            "Waiting for batch in {} (up to {} cycles)",
            self.directory.display(),
            max_cycles
        );

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break DetectionOutcome::Cancelled(sorted(tracker.remembered()));
            }

            cycles += 1;
            let scan = self.scan_once().await;

            if self.cancel.is_cancelled() {
                break DetectionOutcome::Cancelled(sorted(tracker.remembered()));
            }

            self.observer.on_event(&DetectionEvent::CycleScanned {
                cycle: cycles,
                detected: scan.statuses.len(),
                released: scan.released.len(),
                statuses: &scan.statuses,
            });

            match tracker.observe(&scan.released) {
                Comparison::Grew { new_files } => {
                    self.observer.on_event(&DetectionEvent::StabilityReset {
                        cycle: cycles,
                        new_files,
                    });
                }
                Comparison::Unchanged { stable_cycles } => {
                    self.observer.on_event(&DetectionEvent::StableCycle {
                        cycle: cycles,
                        stable_cycles,
                        required: tracker.required(),
                    });
                }
            }

            if tracker.is_ready(&scan.released) {
                break DetectionOutcome::Ready(sorted(&scan.released));
            }

            if cycles >= max_cycles {
                break DetectionOutcome::TimedOut(sorted(tracker.remembered()));
            }

            if !self.cancel.sleep(self.config.poll_interval()).await {
                break DetectionOutcome::Cancelled(sorted(tracker.remembered()));
            }
        };

        self.observer.on_event(&DetectionEvent::Finished {
            outcome: outcome.kind(),
            cycles,
            files: outcome.files().len(),
        });

        DetectionReport {
            session_id,
            directory: self.directory,
            started_at,
            finished_at: Utc::now(),
            cycles,
            outcome,
        }
    }
}

fn sorted(set: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    set.iter().cloned().collect()
}
