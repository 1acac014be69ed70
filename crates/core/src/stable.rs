use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::fs::ProbeFs;

/// Check if a file is stable (not being written to) by comparing its size
/// across a short wait.
///
/// This is the fallback used when the file cannot be opened exclusively. It
/// cannot tell a finished file from one whose writer is paused with the
/// handle still open, so a `true` here is best-effort only.
///
/// # Returns
/// * `Ok(true)` if both size reads succeeded and matched
/// * `Ok(false)` if the size changed, or the wait was cancelled
/// * `Err` if either size read failed
pub async fn check_stability<F>(
    fs: &F,
    path: &Path,
    interval: Duration,
    cancel: &CancelToken,
) -> Result<bool>
where
    F: ProbeFs + ?Sized,
{
    let initial_size = fs
        .file_size(path)
        .await
        .with_context(|| format!("Failed to get metadata for {}", path.display()))?;
    debug!(
        "Checking stability for {}: initial size = {} bytes",
        path.display(),
        initial_size
    );

    if !cancel.sleep(interval).await {
        return Ok(false);
    }

    let current_size = fs
        .file_size(path)
        .await
        .with_context(|| format!("Failed to get metadata for {}", path.display()))?;

    let is_stable = initial_size == current_size;

    if is_stable {
        debug!("File is stable: {}", path.display());
    } else {
        debug!(
            "File is unstable: {} (size changed from {} to {} bytes)",
            path.display(),
            initial_size,
            current_size
        );
    }

    Ok(is_stable)
}
