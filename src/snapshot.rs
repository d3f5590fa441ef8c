//! Point-in-time repository state.

use crate::crypto::sha256_hex;
use crate::error::Result;
use crate::git::{ChangeCounts, CommitSummary, GitRepo, HeadState, Tracking};
use crate::retention::TIMESTAMP_FORMAT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub taken_at: DateTime<Utc>,
    pub path: PathBuf,
    pub name: String,
    /// Branch HEAD points at; for a detached HEAD this is `HEAD`.
    pub branch: String,
    pub detached: bool,
    pub dirty: bool,
    pub changes: ChangeCounts,
    pub stashes: usize,
    pub tracking: Tracking,
    /// `None` for a repository without commits.
    pub last_commit: Option<CommitSummary>,
    pub remote_url: Option<String>,
    /// Days since the last commit; `None` without commits.
    pub inactive_days: Option<i64>,
}

impl RepositorySnapshot {
    pub fn is_ahead(&self) -> bool {
        matches!(self.tracking, Tracking::Tracking { ahead, .. } if ahead > 0)
    }

    pub fn is_stale(&self, threshold_days: i64) -> bool {
        self.inactive_days.is_some_and(|d| d > threshold_days)
    }
}

/// Capture the state of the working tree at `path`.
pub fn inspect(path: &Path, now: DateTime<Utc>) -> Result<RepositorySnapshot> {
    let mut repo = GitRepo::open(path)?;

    let (branch, detached) = match repo.head_state()? {
        HeadState::Branch(b) | HeadState::Unborn(b) => (b, false),
        HeadState::Detached => ("HEAD".to_string(), true),
    };
    let changes = repo.change_counts()?;
    let stashes = repo.stash_count()?;
    let tracking = if detached {
        Tracking::NoUpstream
    } else {
        repo.tracking(&branch)?
    };
    let last_commit = repo.last_commit()?;
    let inactive_days = last_commit
        .as_ref()
        .map(|c| (now - c.time).num_days().max(0));

    let snapshot = RepositorySnapshot {
        taken_at: now,
        path: repo.workdir().to_path_buf(),
        name: repo.name(),
        branch,
        detached,
        dirty: changes.is_dirty(),
        changes,
        stashes,
        tracking,
        last_commit,
        remote_url: repo.remote_url(),
        inactive_days,
    };
    debug!(
        repository = %snapshot.name,
        branch = %snapshot.branch,
        dirty = snapshot.dirty,
        "inspected"
    );
    Ok(snapshot)
}

/// Write the snapshot as `<dir>/<name>-<path digest>-<timestamp>.json`.
///
/// Failure is logged and reported as `None`; the snapshot itself is
/// unaffected.
pub fn write_status_record(dir: &Path, snapshot: &RepositorySnapshot) -> Option<PathBuf> {
    let path = dir.join(format!(
        "{}-{}-{}.json",
        snapshot.name,
        path_tag(&snapshot.path),
        snapshot.taken_at.format(TIMESTAMP_FORMAT)
    ));
    let result = fs::create_dir_all(dir)
        .map_err(crate::error::GuardError::from)
        .and_then(|_| Ok(serde_json::to_vec_pretty(snapshot)?))
        .and_then(|bytes| Ok(fs::write(&path, bytes)?));
    match result {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("could not write status record {}: {e}", path.display());
            None
        }
    }
}

/// Short digest of the repository path; keeps records of same-named
/// repositories apart.
fn path_tag(path: &Path) -> String {
    let digest = sha256_hex(path.to_string_lossy().as_bytes());
    digest[..8].to_string()
}
