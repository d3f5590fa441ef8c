//! Backup-set path patterns to a concrete file list.

use crate::config::expand_path;
use crate::error::Result;
use glob::Pattern;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Expand `patterns` (`~`, `$VAR`, glob syntax) into the sorted set of
/// existing regular files, walking directories, minus anything matching an
/// `exclude` pattern by full path or by file name.
pub fn resolve_paths(patterns: &[String], exclude: &[String]) -> Result<Vec<PathBuf>> {
    let excludes = exclude
        .iter()
        .map(|p| expanded(p).and_then(|p| Ok(Pattern::new(&p)?)))
        .collect::<Result<Vec<_>>>()?;
    let is_excluded = |path: &Path| {
        excludes.iter().any(|p| {
            p.matches_path(path)
                || path
                    .file_name()
                    .is_some_and(|n| p.matches(&n.to_string_lossy()))
        })
    };

    let mut files = BTreeSet::new();
    for pattern in patterns {
        let pattern = expanded(pattern)?;
        let roots: Vec<PathBuf> = if has_glob_meta(&pattern) {
            glob::glob(&pattern)?.filter_map(|entry| entry.ok()).collect()
        } else {
            vec![PathBuf::from(&pattern)]
        };

        for root in roots {
            if root.is_file() {
                if !is_excluded(&root) {
                    files.insert(root);
                }
                continue;
            }
            if !root.is_dir() {
                debug!("{} does not exist; skipping", root.display());
                continue;
            }
            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_excluded(e.path()));
            for entry in walker.filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    files.insert(entry.into_path());
                }
            }
        }
    }
    Ok(files.into_iter().collect())
}

fn expanded(pattern: &str) -> Result<String> {
    Ok(expand_path(Path::new(pattern))?.to_string_lossy().into_owned())
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Name of `path` inside the archive: the absolute path without its root,
/// so `/home/me/.ssh/config` is stored as `home/me/.ssh/config`.
pub fn entry_name(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
