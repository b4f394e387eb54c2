use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::error;

/// Change stamp for a file: size and modification time. A file is queued
/// again only when its stamp changes.
pub fn source_stamp(metadata: &Metadata) -> String {
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}:{}", metadata.len(), modified)
}

/// Parallel directory traversal. Builds a map of path → change stamp,
/// filtering by glob ignore patterns. Skips symlinks and 0-byte files.
pub fn build_stamp_map(
    root_paths: &[&str],
    ignore_globs: &[&str],
) -> io::Result<DashMap<PathBuf, String>> {
    let map: DashMap<PathBuf, String> = DashMap::new();

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    root_paths
        .par_iter()
        .try_for_each(|root_dir| visit_dirs(Path::new(root_dir), &map, &ignore_patterns))?;

    Ok(map)
}

fn is_ignored(path: &Path, ignore_patterns: &[Pattern]) -> bool {
    ignore_patterns.iter().any(|p| p.matches_path(path))
}

fn visit_dirs(
    dir: &Path,
    map: &DashMap<PathBuf, String>,
    ignore_patterns: &[Pattern],
) -> io::Result<()> {
    if !dir.is_dir() || is_ignored(dir, ignore_patterns) {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            error!("Access denied reading directory {}: {}", dir.display(), err);
            return Ok(());
        }
        Err(err) => {
            return Err(io::Error::new(
                err.kind(),
                format!("Error reading directory {}: {}", dir.display(), err),
            ));
        }
    };

    entries.par_bridge().try_for_each(|entry_result| {
        let entry = entry_result.map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error reading entry in directory {}: {}", dir.display(), err),
            )
        })?;

        let path = entry.path();
        // Files can vanish between listing and stat; that is not fatal.
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(io::Error::new(
                    err.kind(),
                    format!("Error getting metadata for {}: {}", path.display(), err),
                ));
            }
        };

        if metadata.file_type().is_symlink() {
            return Ok(());
        }
        if metadata.is_dir() {
            visit_dirs(&path, map, ignore_patterns)?;
        } else if metadata.len() > 0 && !is_ignored(&path, ignore_patterns) {
            map.insert(path, source_stamp(&metadata));
        }
        Ok(())
    })?;

    Ok(())
}
