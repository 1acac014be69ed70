#![allow(dead_code)]

use async_trait::async_trait;
use batchwait_core::fs::ProbeFs;
use batchwait_core::observer::{DetectionEvent, DetectionObserver};
use batchwait_core::{FileStatus, OutcomeKind};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// How the fake filesystem answers an exclusive open for one path.
#[derive(Debug, Clone)]
pub enum Behavior {
    Free,
    Locked,
    /// Lock conflict for the first `n` opens, then free.
    LockedFor(u32),
    Denied,
    Broken,
}

/// Scripted filesystem. Paths with no behavior are reported as not found.
#[derive(Default)]
pub struct FakeFs {
    behaviors: Mutex<HashMap<PathBuf, Behavior>>,
    sizes: Mutex<HashMap<PathBuf, Vec<u64>>>,
    open_calls: Mutex<HashMap<PathBuf, u32>>,
    size_calls: Mutex<HashMap<PathBuf, u32>>,
}

impl FakeFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: &Path, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), behavior);
    }

    /// Sizes returned by successive `file_size` calls; the last one repeats.
    pub fn set_sizes(&self, path: &Path, sizes: Vec<u64>) {
        self.sizes.lock().unwrap().insert(path.to_path_buf(), sizes);
    }

    pub fn open_calls(&self, path: &Path) -> u32 {
        *self.open_calls.lock().unwrap().get(path).unwrap_or(&0)
    }

    pub fn size_calls(&self, path: &Path) -> u32 {
        *self.size_calls.lock().unwrap().get(path).unwrap_or(&0)
    }
}

#[async_trait]
impl ProbeFs for FakeFs {
    async fn open_exclusive(&self, path: &Path) -> io::Result<()> {
        let calls = {
            let mut open_calls = self.open_calls.lock().unwrap();
            let calls = open_calls.entry(path.to_path_buf()).or_insert(0);
            *calls += 1;
            *calls
        };

        let behavior = self.behaviors.lock().unwrap().get(path).cloned();
        match behavior {
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
            Some(Behavior::Free) => Ok(()),
            Some(Behavior::Locked) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Some(Behavior::LockedFor(n)) if calls <= n => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            Some(Behavior::LockedFor(_)) => Ok(()),
            Some(Behavior::Denied) => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
            Some(Behavior::Broken) => Err(io::Error::other("device unavailable")),
        }
    }

    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        let call = {
            let mut size_calls = self.size_calls.lock().unwrap();
            let calls = size_calls.entry(path.to_path_buf()).or_insert(0);
            *calls += 1;
            *calls as usize
        };

        let sizes = self.sizes.lock().unwrap();
        match sizes.get(path) {
            Some(seq) if !seq.is_empty() => Ok(seq[(call - 1).min(seq.len() - 1)]),
            _ => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

/// Owned copy of a detection event.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    CycleScanned {
        cycle: u64,
        detected: usize,
        released: usize,
        statuses: BTreeMap<PathBuf, FileStatus>,
    },
    StabilityReset { cycle: u64, new_files: usize },
    StableCycle { cycle: u64, stable_cycles: u32 },
    LockConflict { path: PathBuf, attempt: u32 },
    PermissionFallback { path: PathBuf },
    SizeChanged { path: PathBuf },
    ProbeError { path: PathBuf },
    ScanFailed,
    Finished { outcome: OutcomeKind, cycles: u64 },
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Recorded) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl DetectionObserver for RecordingObserver {
    fn on_event(&self, event: &DetectionEvent<'_>) {
        let recorded = match event {
            DetectionEvent::CycleScanned {
                cycle,
                detected,
                released,
                statuses,
            } => Recorded::CycleScanned {
                cycle: *cycle,
                detected: *detected,
                released: *released,
                statuses: (*statuses).clone(),
            },
            DetectionEvent::StabilityReset { cycle, new_files } => Recorded::StabilityReset {
                cycle: *cycle,
                new_files: *new_files,
            },
            DetectionEvent::StableCycle {
                cycle,
                stable_cycles,
                ..
            } => Recorded::StableCycle {
                cycle: *cycle,
                stable_cycles: *stable_cycles,
            },
            DetectionEvent::LockConflict { path, attempt, .. } => Recorded::LockConflict {
                path: path.to_path_buf(),
                attempt: *attempt,
            },
            DetectionEvent::PermissionFallback { path } => Recorded::PermissionFallback {
                path: path.to_path_buf(),
            },
            DetectionEvent::SizeChanged { path } => Recorded::SizeChanged {
                path: path.to_path_buf(),
            },
            DetectionEvent::ProbeError { path, .. } => Recorded::ProbeError {
                path: path.to_path_buf(),
            },
            DetectionEvent::ScanFailed { .. } => Recorded::ScanFailed,
            DetectionEvent::Finished {
                outcome, cycles, ..
            } => Recorded::Finished {
                outcome: *outcome,
                cycles: *cycles,
            },
        };
        self.events.lock().unwrap().push(recorded);
    }
}
