//! Finds files a snippet left behind in its output directory.
//!
//! Discovery is time-scoped, not per-request: two runs sharing a directory in
//! overlapping windows can see each other's files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Filesystem timestamps come from a coarse clock and can trail `SystemTime::now()`.
pub const MTIME_SLACK: Duration = Duration::from_millis(50);

/// Files under `directory` modified at or after `since`, sorted by path.
pub fn discover_new(directory: &Path, since: SystemTime, recursive: bool) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect(directory, since, recursive, &mut found);
    found.sort();
    found
}

fn collect(directory: &Path, since: SystemTime, recursive: bool, found: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %directory.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping entry without metadata");
                continue;
            }
        };

        if metadata.is_dir() {
            if recursive {
                collect(&path, since, recursive, found);
            }
            continue;
        }
        if !metadata.is_file() {
            continue;
        }

        match metadata.modified() {
            Ok(modified) if modified >= since => found.push(path),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "no modification time"),
        }
    }
}

/// Explicit entries first, then discovered ones not already listed.
pub fn merge_artifacts(explicit: &[PathBuf], discovered: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for path in explicit.iter().chain(discovered) {
        if seen.insert(identity(path)) {
            merged.push(path.clone());
        }
    }
    merged
}

fn identity(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
