use anyhow::{Context, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// List candidate files directly inside `dir` whose names end with `suffix`.
///
/// Subdirectories are never descended into. Symlinks are not followed, so a
/// symlinked file is skipped even when its name matches. A file named exactly
/// `suffix` is not a candidate, and matching is case-sensitive. The result is
/// sorted so every cycle probes files in the same order. A directory that
/// does not exist yet yields an empty list; any other failure to read the
/// directory itself is returned as an error.
pub fn list_candidates(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    match std::fs::metadata(dir) {
        Ok(metadata) if !metadata.is_dir() => {
            anyhow::bail!("Target is not a directory: {}", dir.display());
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Target directory does not exist yet: {}", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to stat directory {}", dir.display()));
        }
    }

    let mut candidates = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
    {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }

                if !matches_suffix(entry.path(), suffix) {
                    continue;
                }

                candidates.push(absolute(entry.path()));
            }
            Err(e) => {
                // The root itself failing means nothing is listable this cycle
                if e.depth() == 0 {
                    return Err(e)
                        .with_context(|| format!("Failed to read directory {}", dir.display()));
                }
                warn!("Error accessing directory entry: {}", e);
            }
        }
    }

    candidates.sort();
    debug!(
        "Found {} candidate files in {}",
        candidates.len(),
        dir.display()
    );
    Ok(candidates)
}

/// Check whether the file name ends with the configured suffix.
pub fn matches_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.len() > suffix.len() && name.ends_with(suffix))
        .unwrap_or(false)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
