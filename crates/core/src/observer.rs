//! Structured detection events and the sinks that consume them.
//!
//! The detector reports what it sees through [`DetectionObserver`]; nothing an
//! observer does can change a classification or the stability decision.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::release::FileStatus;
use crate::session::OutcomeKind;

#[derive(Debug)]
pub enum DetectionEvent<'a> {
    /// One scan finished.
    CycleScanned {
        cycle: u64,
        detected: usize,
        released: usize,
        statuses: &'a BTreeMap<PathBuf, FileStatus>,
    },
    /// A newly released file reset the stability counter.
    StabilityReset { cycle: u64, new_files: usize },
    /// No new released file this cycle.
    StableCycle {
        cycle: u64,
        stable_cycles: u32,
        required: u32,
    },
    LockConflict {
        path: &'a Path,
        attempt: u32,
        max_attempts: u32,
    },
    PermissionFallback { path: &'a Path },
    SizeChanged { path: &'a Path },
    ProbeError { path: &'a Path, error: String },
    ScanFailed { dir: &'a Path, error: String },
    Finished {
        outcome: OutcomeKind,
        cycles: u64,
        files: usize,
    },
}

pub trait DetectionObserver: Send + Sync {
    fn on_event(&self, event: &DetectionEvent<'_>);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DetectionObserver for NoopObserver {
    fn on_event(&self, _event: &DetectionEvent<'_>) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DetectionObserver for TracingObserver {
    fn on_event(&self, event: &DetectionEvent<'_>) {
        match event {
            DetectionEvent::CycleScanned {
                cycle,
                detected,
                released,
                statuses,
            } => {
                info!(
                    cycle,
                    detected,
                    released,
                    "Scan cycle complete: {} files detected",
                    detected
                );
                for (path, status) in statuses.iter() {
                    debug!(cycle, status = %status, "{}", path.display());
                }
            }
            DetectionEvent::StabilityReset { cycle, new_files } => {
                debug!(cycle, new_files, "New released files, stability counter reset");
            }
            DetectionEvent::StableCycle {
                cycle,
                stable_cycles,
                required,
            } => {
                debug!(cycle, "Batch stable for {}/{} cycles", stable_cycles, required);
            }
            DetectionEvent::LockConflict {
                path,
                attempt,
                max_attempts,
            } => {
                debug!(
                    "File locked, attempt {}/{}: {}",
                    attempt,
                    max_attempts,
                    path.display()
                );
            }
            DetectionEvent::PermissionFallback { path } => {
                warn!(
                    "Exclusive open not permitted, falling back to size check: {}",
                    path.display()
                );
            }
            DetectionEvent::SizeChanged { path } => {
                debug!("Size still changing: {}", path.display());
            }
            DetectionEvent::ProbeError { path, error } => {
                warn!("Failed to probe {}: {}", path.display(), error);
            }
            DetectionEvent::ScanFailed { dir, error } => {
                warn!("Failed to scan {}: {}", dir.display(), error);
            }
            DetectionEvent::Finished {
                outcome,
                cycles,
                files,
            } => match outcome {
                OutcomeKind::Ready => {
                    info!(cycles, "Batch ready: {} files", files);
                }
                OutcomeKind::TimedOut => {
                    warn!(cycles, "Timed out waiting for batch, {} files stable", files);
                }
                OutcomeKind::Cancelled => {
                    warn!(cycles, "Detection cancelled, {} files stable", files);
                }
            },
        }
    }
}
