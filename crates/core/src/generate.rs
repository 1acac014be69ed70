//! Synthetic batch producer used to exercise the detector.
//!
//! Each file is created under a staging name, locked for writing, filled with
//! CSV rows spread over a random delay, renamed into place while still
//! locked, and only then released, the way a real producer on a shared
//! directory behaves. Writes run on the blocking pool.

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::fs::lock_for_writing;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub file_count: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub rows_per_file: usize,
    pub max_parallel: usize,
    pub file_prefix: String,
    pub file_suffix: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            file_count: 20,
            min_delay_ms: 10,
            max_delay_ms: 50,
            rows_per_file: 100,
            max_parallel: 4,
            file_prefix: "batch".to_string(),
            file_suffix: ".csv".to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            anyhow::bail!("max_parallel must be at least 1");
        }
        if self.min_delay_ms > self.max_delay_ms {
            anyhow::bail!("min_delay_ms must not exceed max_delay_ms");
        }
        if self.file_suffix.is_empty() {
            anyhow::bail!("file_suffix cannot be empty");
        }
        Ok(())
    }

    pub fn file_name(&self, index: usize) -> String {
        format!("{}_{:04}{}", self.file_prefix, index, self.file_suffix)
    }
}

/// Bounds how many files are being written at once.
pub struct WriterPool {
    semaphore: Arc<Semaphore>,
    max_parallel: usize,
}

impl WriterPool {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `write_fn` once a slot is free.
    pub async fn run<F, Fut, T>(&self, write_fn: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to acquire writer slot: {}", e))?;

        write_fn().await
    }
}

/// Write `config.file_count` files into `dir`, creating it if needed.
///
/// Returns the absolute paths written, sorted.
pub async fn generate_batch(dir: &Path, config: &GeneratorConfig) -> Result<Vec<PathBuf>> {
    config.validate()?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    let dir = std::path::absolute(dir)
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;

    info!(
        "Generating {} files in {} ({} writers)",
        config.file_count,
        dir.display(),
        config.max_parallel
    );

    let pool = Arc::new(WriterPool::new(config.max_parallel));
    let mut writers = JoinSet::new();

    for index in 0..config.file_count {
        let path = dir.join(config.file_name(index));
        let delay = random_delay(config.min_delay_ms, config.max_delay_ms);
        let rows = config.rows_per_file;
        let pool = pool.clone();

        writers.spawn(async move {
            pool.run(|| async move {
                tokio::task::spawn_blocking(move || write_file(path, rows, delay))
                    .await
                    .context("Writer thread panicked")?
            })
            .await
        });
    }

    let mut written = Vec::with_capacity(config.file_count);
    while let Some(joined) = writers.join_next().await {
        let path = joined.context("Writer task panicked")??;
        written.push(path);
    }

    written.sort();
    info!("Generated {} files", written.len());
    Ok(written)
}

fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Name a file is written under before it becomes visible to the suffix
/// filter.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Write one file while holding its lock.
///
/// The file is created and locked under its staging name, filled in chunks
/// spread over `delay`, then renamed to `path` with the lock still held. It
/// never appears under its final name unlocked.
fn write_file(path: PathBuf, rows: usize, delay: Duration) -> Result<PathBuf> {
    const CHUNKS: usize = 4;

    let staging = staging_path(&path);
    let mut file = lock_for_writing(&staging)
        .with_context(|| format!("Failed to open {} for writing", staging.display()))?;
    debug!("Writing {}", staging.display());

    writeln!(file, "id,timestamp,value")
        .with_context(|| format!("Failed to write header to {}", staging.display()))?;

    let per_chunk = rows.div_ceil(CHUNKS).max(1);
    let pause = delay / CHUNKS as u32;
    let mut rng = rand::thread_rng();
    let mut row = 0;

    for chunk in 0..CHUNKS {
        let end = (row + per_chunk).min(rows);
        while row < end {
            let value: f64 = rng.gen_range(0.0..1000.0);
            writeln!(file, "{},{},{:.3}", row, Utc::now().to_rfc3339(), value)
                .with_context(|| format!("Failed to write row to {}", staging.display()))?;
            row += 1;
        }
        file.flush()
            .with_context(|| format!("Failed to flush {}", staging.display()))?;

        // Publish halfway so the file is seen growing under its final name
        if chunk == CHUNKS / 2 - 1 {
            std::fs::rename(&staging, &path).with_context(|| {
                format!("Failed to rename {} to {}", staging.display(), path.display())
            })?;
        }
        std::thread::sleep(pause);
    }

    // Dropping the handle releases the lock
    drop(file);
    debug!("Finished {}", path.display());
    Ok(path)
}
