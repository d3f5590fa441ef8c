use crate::error::{GuardError, Result};
use crate::process::run_with_deadline;
use crate::retention::BACKUP_BRANCH_PREFIX;
use chrono::{DateTime, TimeZone, Utc};
use git2::{
    build::CheckoutBuilder, BranchType, DiffFormat, ErrorCode, IndexAddOption, Oid, Repository,
    Signature, Sort, Status, StatusOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Where HEAD points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    Branch(String),
    /// A branch with no commits yet.
    Unborn(String),
    Detached,
}

/// Working-tree change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub untracked: usize,
    pub staged: usize,
    pub modified: usize,
}

impl ChangeCounts {
    pub fn is_dirty(&self) -> bool {
        self.untracked + self.staged + self.modified > 0
    }
}

/// Relationship of a local branch to its upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Tracking {
    /// No upstream configured; ahead/behind do not apply.
    NoUpstream,
    Tracking {
        upstream: String,
        ahead: usize,
        behind: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub summary: String,
    pub author: String,
    pub time: DateTime<Utc>,
}

/// Added lines of one commit's diff against its first parent.
#[derive(Debug, Clone)]
pub struct HistoryPatch {
    pub commit: String,
    pub added: String,
}

pub struct GitRepo {
    repo: Repository,
    workdir: PathBuf,
}

impl GitRepo {
    /// Open the working tree rooted exactly at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path)
            .map_err(|_| GuardError::NotARepository(path.to_path_buf()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GuardError::NotARepository(path.to_path_buf()))?
            .to_path_buf();
        Ok(Self { repo, workdir })
    }

    /// Get the git directory path
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Get repository root path
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn name(&self) -> String {
        self.workdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.workdir.display().to_string())
    }

    pub fn head_state(&self) -> Result<HeadState> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => Ok(HeadState::Branch(
                head.shorthand().unwrap_or("HEAD").to_string(),
            )),
            Ok(_) => Ok(HeadState::Detached),
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                let head = self.repo.find_reference("HEAD")?;
                let target = head
                    .symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .unwrap_or("HEAD")
                    .to_string();
                Ok(HeadState::Unborn(target))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn change_counts(&self) -> Result<ChangeCounts> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        let mut counts = ChangeCounts::default();
        for entry in statuses.iter() {
            let s = entry.status();
            if s.contains(Status::WT_NEW) {
                counts.untracked += 1;
            }
            if s.intersects(
                Status::INDEX_NEW
                    | Status::INDEX_MODIFIED
                    | Status::INDEX_DELETED
                    | Status::INDEX_RENAMED
                    | Status::INDEX_TYPECHANGE,
            ) {
                counts.staged += 1;
            }
            if s.intersects(
                Status::WT_MODIFIED
                    | Status::WT_DELETED
                    | Status::WT_RENAMED
                    | Status::WT_TYPECHANGE
                    | Status::CONFLICTED,
            ) {
                counts.modified += 1;
            }
        }
        Ok(counts)
    }

    pub fn stash_count(&mut self) -> Result<usize> {
        let mut count = 0;
        match self.repo.stash_foreach(|_, _, _| {
            count += 1;
            true
        }) {
            Ok(()) => Ok(count),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub fn tracking(&self, branch: &str) -> Result<Tracking> {
        let local = match self.repo.find_branch(branch, BranchType::Local) {
            Ok(b) => b,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(Tracking::NoUpstream),
            Err(e) => return Err(e.into()),
        };
        let upstream = match local.upstream() {
            Ok(u) => u,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(Tracking::NoUpstream),
            Err(e) => return Err(e.into()),
        };

        let (Some(local_oid), Some(upstream_oid)) = (local.get().target(), upstream.get().target())
        else {
            return Ok(Tracking::NoUpstream);
        };
        let (ahead, behind) = self.repo.graph_ahead_behind(local_oid, upstream_oid)?;
        Ok(Tracking::Tracking {
            upstream: upstream.name()?.unwrap_or("upstream").to_string(),
            ahead,
            behind,
        })
    }

    pub fn last_commit(&self) -> Result<Option<CommitSummary>> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        let time = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);
        let id = commit.id().to_string();
        let author = commit.author();
        let summary = CommitSummary {
            id: id[..7.min(id.len())].to_string(),
            summary: commit.summary().unwrap_or_default().to_string(),
            author: author.name().unwrap_or_default().to_string(),
            time,
        };
        Ok(Some(summary))
    }

    /// `origin` when present, otherwise the first configured remote.
    pub fn default_remote(&self) -> Option<String> {
        let remotes = self.repo.remotes().ok()?;
        if remotes.iter().flatten().any(|r| r == "origin") {
            return Some("origin".into());
        }
        let first = remotes.iter().flatten().next().map(str::to_string);
        first
    }

    pub fn remote_url(&self) -> Option<String> {
        let name = self.default_remote()?;
        let remote = self.repo.find_remote(&name).ok()?;
        let url = remote.url().map(str::to_string);
        url
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now("repo-guard", "repo-guard@localhost")?),
        }
    }

    /// Stage every change (honouring .gitignore). Returns the number of
    /// changed paths that were pending.
    pub fn stage_all(&self) -> Result<usize> {
        let pending = {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true).recurse_untracked_dirs(true);
            self.repo.statuses(Some(&mut opts))?.len()
        };
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(pending)
    }

    /// Commit the current index onto HEAD, creating the root commit on an
    /// unborn branch.
    pub fn commit_index(&self, message: &str) -> Result<Oid> {
        let mut index = self.repo.index()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;
        let sig = self.signature()?;
        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        Ok(self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?)
    }

    pub fn create_branch_at_head(&self, name: &str) -> Result<()> {
        let commit = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(name, &commit, false)?;
        Ok(())
    }

    /// Point HEAD at `branch` without touching the working tree.
    pub fn switch_head(&self, branch: &str) -> Result<()> {
        self.repo.set_head(&format!("refs/heads/{branch}"))?;
        Ok(())
    }

    /// Point HEAD at `branch` and force the working tree to match it.
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        self.switch_head(branch)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    pub fn backup_branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                if name.starts_with(BACKUP_BRANCH_PREFIX) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        match self.repo.find_branch(name, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.repo.find_branch(name, BranchType::Local)?.delete()?;
        Ok(())
    }

    /// Paths recorded in the index, relative to the working tree.
    pub fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        let index = self.repo.index()?;
        let mut files: Vec<PathBuf> = index
            .iter()
            .map(|entry| PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned()))
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Added lines of the `depth` most recent commits reachable from HEAD.
    pub fn recent_patches(&self, depth: usize) -> Result<Vec<HistoryPatch>> {
        if depth == 0 || matches!(self.head_state()?, HeadState::Unborn(_)) {
            return Ok(Vec::new());
        }

        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(Sort::TIME)?;

        let mut patches = Vec::new();
        for oid in revwalk.take(depth) {
            let commit = self.repo.find_commit(oid?)?;
            let tree = commit.tree()?;
            let parent_tree = match commit.parents().next() {
                Some(parent) => Some(parent.tree()?),
                None => None,
            };
            let diff = self
                .repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

            let mut added = String::new();
            diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
                if line.origin() == '+' {
                    added.push_str(&String::from_utf8_lossy(line.content()));
                }
                true
            })?;

            let id = commit.id().to_string();
            patches.push(HistoryPatch {
                commit: id[..7.min(id.len())].to_string(),
                added,
            });
        }
        Ok(patches)
    }

    /// Push `refspecs` to `remote` with the git executable, killing it once
    /// `timeout` elapses.
    pub fn push(&self, remote: &str, refspecs: &[String], timeout: Duration) -> Result<()> {
        let command = format!("git push {remote} {}", refspecs.join(" "));
        debug!("running `{command}` in {}", self.workdir.display());

        let finished = run_with_deadline(
            Command::new("git")
                .arg("-C")
                .arg(&self.workdir)
                .args(["push", "--porcelain", remote])
                .args(refspecs)
                .env("GIT_TERMINAL_PROMPT", "0"),
            &command,
            timeout,
        )?;
        if finished.status.success() {
            return Ok(());
        }
        Err(GuardError::Command {
            command,
            detail: String::from_utf8_lossy(&finished.stderr).trim().to_string(),
        })
    }
}
