//! # Defensive Git Operator
//!
//! Runs the per-repository sequence
//!
//! 1. **auto-commit** dirty work on an allow-listed branch,
//! 2. **backup branch** `backup/<timestamp>_<branch>` holding anything left over
//!    (`backup/<timestamp>-<n>_<branch>` if that name is taken),
//! 3. **push** when the branch is ahead of its upstream,
//! 4. **prune** backup branches beyond the keep count.
//!
//! Every stage may be a no-op. A git failure ends the sequence for that
//! repository only; network trouble during push is downgraded to a warning.
//! Cancellation is honoured between stages, never inside one.

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::git::{GitRepo, Tracking};
use crate::retention::{prune_by_count, BackupBranch};
use crate::snapshot::RepositorySnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const COMMIT_TAG: &str = "WIP backup commit";
const MAX_SAME_SECOND_BACKUPS: u32 = 100;

#[derive(Debug, Clone)]
pub struct OperatorSettings {
    pub auto_commit_branches: Vec<String>,
    pub max_backup_branches: usize,
    pub push_timeout: Duration,
    /// Create backup branches for dirty repositories on any branch.
    pub force: bool,
}

impl OperatorSettings {
    pub fn from_config(config: &GuardConfig, force: bool) -> Self {
        Self {
            auto_commit_branches: config.auto_commit_branches.clone(),
            max_backup_branches: config.max_backup_branches,
            push_timeout: Duration::from_secs(config.push_timeout_secs),
            force,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PushOutcome {
    NotAttempted,
    /// Upstream already has every local commit.
    UpToDate,
    Pushed { backup_branches: usize, failed: usize },
    /// Degraded: no remote, no upstream, network failure or timeout.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorReport {
    pub committed: Option<String>,
    pub backup_branch: Option<String>,
    pub push: PushOutcome,
    pub pruned: Vec<String>,
    /// Set when a git failure aborted the remaining stages.
    pub failure: Option<String>,
    pub cancelled: bool,
}

impl Default for OperatorReport {
    fn default() -> Self {
        Self {
            committed: None,
            backup_branch: None,
            push: PushOutcome::NotAttempted,
            pruned: Vec::new(),
            failure: None,
            cancelled: false,
        }
    }
}

/// A stage of the per-repository sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Commit,
    BackupBranch,
    Push,
    Prune,
}

pub struct GitOperator<'a> {
    settings: &'a OperatorSettings,
    cancel: &'a AtomicBool,
    on_stage: Option<&'a (dyn Fn(Stage) + Sync)>,
}

impl<'a> GitOperator<'a> {
    pub fn new(settings: &'a OperatorSettings, cancel: &'a AtomicBool) -> Self {
        Self {
            settings,
            cancel,
            on_stage: None,
        }
    }

    /// Call `hook` after each stage that ran to completion.
    pub fn on_stage(mut self, hook: &'a (dyn Fn(Stage) + Sync)) -> Self {
        self.on_stage = Some(hook);
        self
    }

    fn finished(&self, stage: Stage) {
        if let Some(hook) = self.on_stage {
            hook(stage);
        }
    }

    /// Run all stages for the repository described by `snapshot`.
    pub fn run(&self, snapshot: &RepositorySnapshot, now: DateTime<Utc>) -> OperatorReport {
        let mut report = OperatorReport::default();
        let result =
            GitRepo::open(&snapshot.path).and_then(|repo| self.stages(&repo, snapshot, now, &mut report));

        if let Err(e) = result {
            error!(
                repository = %snapshot.name,
                "git operation failed, remaining stages skipped: {e}"
            );
            report.failure = Some(e.to_string());
        }
        report
    }

    fn cancelled(&self, report: &mut OperatorReport, snapshot: &RepositorySnapshot) -> bool {
        if self.cancel.load(Ordering::SeqCst) {
            if !report.cancelled {
                info!(repository = %snapshot.name, "cancelled; stopping before next stage");
            }
            report.cancelled = true;
        }
        report.cancelled
    }

    fn stages(
        &self,
        repo: &GitRepo,
        snapshot: &RepositorySnapshot,
        now: DateTime<Utc>,
        report: &mut OperatorReport,
    ) -> Result<()> {
        let allowed = self
            .settings
            .auto_commit_branches
            .iter()
            .any(|b| b == &snapshot.branch);

        if snapshot.detached && snapshot.dirty {
            return Err(GuardError::DetachedHead(snapshot.path.clone()));
        }

        if allowed && snapshot.dirty {
            if self.cancelled(report, snapshot) {
                return Ok(());
            }
            report.committed = self.auto_commit(repo, snapshot, now)?;
            self.finished(Stage::Commit);
        }

        if snapshot.dirty && (allowed || self.settings.force) {
            if self.cancelled(report, snapshot) {
                return Ok(());
            }
            let name = free_backup_name(repo, &snapshot.branch, now)?;
            self.create_backup_branch(repo, &snapshot.branch, &name, now)?;
            report.backup_branch = Some(name);
            self.finished(Stage::BackupBranch);
        }

        if self.cancelled(report, snapshot) {
            return Ok(());
        }
        if !snapshot.detached {
            let has_new_work = report.committed.is_some() || report.backup_branch.is_some();
            report.push = self.push(repo, &snapshot.branch, has_new_work);
            self.finished(Stage::Push);
        }

        if self.cancelled(report, snapshot) {
            return Ok(());
        }
        report.pruned = self.prune(repo, &snapshot.branch)?;
        self.finished(Stage::Prune);
        Ok(())
    }

    fn auto_commit(
        &self,
        repo: &GitRepo,
        snapshot: &RepositorySnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let changed = repo.stage_all()?;
        if changed == 0 {
            debug!(repository = %snapshot.name, "nothing to stage");
            return Ok(None);
        }
        let message = format!(
            "{COMMIT_TAG}: {} ({changed} files)",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let oid = repo.commit_index(&message)?;
        let id = oid.to_string()[..7].to_string();
        info!(
            repository = %snapshot.name,
            branch = %snapshot.branch,
            "committed {changed} files as {id}"
        );
        Ok(Some(id))
    }

    /// Branch off HEAD, commit leftovers there, then return to `original`.
    fn create_backup_branch(
        &self,
        repo: &GitRepo,
        original: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        repo.create_branch_at_head(name)?;
        repo.switch_head(name)?;

        let outcome = commit_leftovers(repo, original, now);

        // Only a successful commit moved the leftovers into history; otherwise
        // keep the working tree exactly as found.
        let restored = match &outcome {
            Ok(true) => repo.checkout_branch(original),
            _ => repo.switch_head(original),
        };
        if let Err(e) = &restored {
            error!("could not return {} to {original}: {e}", repo.name());
        }

        match outcome {
            Ok(_) => {
                restored?;
                info!("created backup branch {name} in {}", repo.name());
                Ok(())
            }
            Err(e) => {
                error!("commit on {name} failed in {}: {e}", repo.name());
                Err(e)
            }
        }
    }

    fn push(&self, repo: &GitRepo, branch: &str, has_new_work: bool) -> PushOutcome {
        let Some(remote) = repo.default_remote() else {
            return degraded(repo, has_new_work, "no remote configured");
        };

        let ahead = match repo.tracking(branch) {
            Ok(Tracking::Tracking { ahead, .. }) => ahead,
            Ok(Tracking::NoUpstream) => {
                return degraded(repo, has_new_work, "no upstream branch");
            }
            Err(e) => return degraded(repo, true, &e.to_string()),
        };
        if ahead == 0 {
            return PushOutcome::UpToDate;
        }

        if let Err(e) = repo.push(&remote, &[refspec(branch)], self.settings.push_timeout) {
            return degraded(repo, true, &e.to_string());
        }
        info!("pushed {branch} ({ahead} commits) to {remote} from {}", repo.name());

        let backups = match repo.backup_branches() {
            Ok(backups) => backups,
            Err(e) => {
                warn!("could not list backup branches in {}: {e}", repo.name());
                Vec::new()
            }
        };
        let mut failed = 0;
        for backup in &backups {
            if let Err(e) = repo.push(&remote, &[refspec(backup)], self.settings.push_timeout) {
                warn!("push of {backup} from {} failed: {e}", repo.name());
                failed += 1;
            }
        }
        PushOutcome::Pushed {
            backup_branches: backups.len() - failed,
            failed,
        }
    }

    fn prune(&self, repo: &GitRepo, current: &str) -> Result<Vec<String>> {
        let branches: Vec<BackupBranch> = repo
            .backup_branches()?
            .iter()
            .filter_map(|name| BackupBranch::parse(name))
            .collect();

        let mut deleted = Vec::new();
        for name in prune_by_count(&branches, self.settings.max_backup_branches) {
            if name == current {
                warn!("not pruning {name} in {}: it is checked out", repo.name());
                continue;
            }
            match repo.delete_branch(&name) {
                Ok(()) => {
                    debug!("pruned {name} in {}", repo.name());
                    deleted.push(name);
                }
                Err(e) => warn!("could not prune {name} in {}: {e}", repo.name()),
            }
        }
        if !deleted.is_empty() {
            info!("pruned {} backup branches in {}", deleted.len(), repo.name());
        }
        Ok(deleted)
    }
}

fn commit_leftovers(repo: &GitRepo, original: &str, now: DateTime<Utc>) -> Result<bool> {
    if !repo.change_counts()?.is_dirty() {
        return Ok(false);
    }
    repo.stage_all()?;
    repo.commit_index(&format!(
        "{COMMIT_TAG}: {} (remaining changes from {original})",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    ))?;
    Ok(true)
}

/// First unused backup branch name for `source` at `now`, adding a sequence
/// suffix when earlier backups landed in the same second.
fn free_backup_name(repo: &GitRepo, source: &str, now: DateTime<Utc>) -> Result<String> {
    for seq in 1..=MAX_SAME_SECOND_BACKUPS {
        let name = BackupBranch::name_with_seq(source, now, seq);
        if !repo.branch_exists(&name)? {
            return Ok(name);
        }
    }
    Err(GuardError::Other(format!(
        "{MAX_SAME_SECOND_BACKUPS} backup branches of {source} already exist for {}",
        now.format("%Y-%m-%d %H:%M:%S")
    )))
}

fn refspec(branch: &str) -> String {
    format!("refs/heads/{branch}:refs/heads/{branch}")
}

/// Push skipped. Logged as a warning when there was something to push.
fn degraded(repo: &GitRepo, loud: bool, reason: &str) -> PushOutcome {
    if loud {
        warn!("push skipped for {}: {reason}", repo.name());
    } else {
        debug!("push skipped for {}: {reason}", repo.name());
    }
    PushOutcome::Skipped(reason.to_string())
}
