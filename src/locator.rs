//! Discovery of working trees under the configured search roots.

use crate::error::{GuardError, Result};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directories never searched for repositories.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    ".venv",
    "venv",
    "__pycache__",
    ".cache",
    ".Trash",
];

/// Every directory containing `.git` within `max_depth` levels of a root.
///
/// The result is canonicalized, deduplicated and sorted. Missing roots are
/// skipped; repositories nested inside a found repository are not reported.
pub fn locate(roots: &[PathBuf], max_depth: usize) -> Result<Vec<PathBuf>> {
    if roots.is_empty() {
        return Err(GuardError::NoSearchRoots);
    }

    let mut found = BTreeSet::new();
    for root in roots {
        if !root.is_dir() {
            debug!("search root {} does not exist; skipping", root.display());
            continue;
        }

        let mut walker = WalkDir::new(root)
            .max_depth(max_depth)
            .follow_links(false)
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping unreadable directory: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if entry.depth() > 0 && is_skipped(entry.file_name()) {
                walker.skip_current_dir();
                continue;
            }
            if is_working_tree(entry.path()) {
                found.insert(canonical(entry.path()));
                walker.skip_current_dir();
            }
        }
    }

    Ok(found.into_iter().collect())
}

fn is_skipped(name: &OsStr) -> bool {
    SKIPPED_DIRS.iter().any(|d| name == OsStr::new(d))
}

fn is_working_tree(dir: &Path) -> bool {
    // `.git` is a file for worktrees and submodules.
    dir.join(".git").exists()
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
