//! Batch runs over every located repository or configured backup set.
//!
//! Repositories are processed in parallel; each one is touched only by its
//! own inspector, operator and scanners. A failure is recorded in that
//! repository's (or set's) outcome and never stops the batch.

use crate::archive::{ArchiveEntry, ArchiveManager};
use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::locator::locate;
use crate::lock::RunLock;
use crate::operator::{GitOperator, OperatorReport, OperatorSettings};
use crate::scan::{RepositoryScan, Scanner};
use crate::snapshot::{inspect, write_status_record, RepositorySnapshot};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const BACKUP_LOCK: &str = "backup";
pub const FORCE_BACKUP_LOCK: &str = "force-backup";
pub const SCAN_LOCK: &str = "scan";
pub const ARCHIVE_LOCK: &str = "archive";

#[derive(Debug, Clone)]
pub struct RepositoryOutcome {
    pub path: PathBuf,
    pub snapshot: Option<RepositorySnapshot>,
    pub operator: Option<OperatorReport>,
    /// Inspection failure; no stage ran.
    pub error: Option<String>,
    /// Not started because the run was cancelled.
    pub skipped: bool,
}

impl RepositoryOutcome {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            snapshot: None,
            operator: None,
            error: None,
            skipped: false,
        }
    }

    pub fn name(&self) -> String {
        match &self.snapshot {
            Some(s) => s.name.clone(),
            None => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
            || self
                .operator
                .as_ref()
                .is_some_and(|op| op.failure.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct BackupRun {
    pub started_at: DateTime<Utc>,
    /// False for read-only status runs.
    pub operated: bool,
    pub repositories: Vec<RepositoryOutcome>,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct ScanRun {
    pub started_at: DateTime<Utc>,
    pub repositories: Vec<RepositoryScan>,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct SetOutcome {
    pub set: String,
    /// `Ok(None)`: the set matched no files.
    pub created: std::result::Result<Option<ArchiveEntry>, String>,
    pub pruned: Vec<PathBuf>,
}

/// Result of applying the retention tiers to one backup set.
#[derive(Debug)]
pub struct PruneOutcome {
    pub set: String,
    pub removed: std::result::Result<Vec<PathBuf>, String>,
}

#[derive(Debug)]
pub struct ArchiveRun {
    pub started_at: DateTime<Utc>,
    pub sets: Vec<SetOutcome>,
    pub cancelled: bool,
}

pub struct Engine {
    config: GuardConfig,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// SIGINT and SIGTERM request cancellation instead of killing the
    /// process mid-write.
    pub fn register_signals(&self) -> Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.cancel))?;
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn lock(&self, name: &str) -> Result<RunLock> {
        RunLock::try_acquire(&self.config.lock_dir(), name)?
            .ok_or_else(|| GuardError::Locked(name.to_string()))
    }

    pub fn repositories(&self) -> Result<Vec<PathBuf>> {
        let repos = locate(&self.config.search_roots, self.config.max_depth)?;
        info!("found {} repositories", repos.len());
        Ok(repos)
    }

    /// Inspect and operate on every repository.
    pub fn backup(&self, force: bool, now: DateTime<Utc>) -> Result<BackupRun> {
        let _lock = self.lock(if force { FORCE_BACKUP_LOCK } else { BACKUP_LOCK })?;
        let settings = OperatorSettings::from_config(&self.config, force);
        let repos = self.repositories()?;

        let repositories: Vec<RepositoryOutcome> = repos
            .par_iter()
            .map(|path| self.backup_one(path, &settings, now))
            .collect();

        Ok(BackupRun {
            started_at: now,
            operated: true,
            repositories,
            cancelled: self.is_cancelled(),
        })
    }

    fn backup_one(
        &self,
        path: &Path,
        settings: &OperatorSettings,
        now: DateTime<Utc>,
    ) -> RepositoryOutcome {
        let mut outcome = self.inspect_one(path, now);
        if let Some(snapshot) = &outcome.snapshot {
            if self.is_cancelled() {
                outcome.skipped = true;
            } else {
                outcome.operator = Some(GitOperator::new(settings, &self.cancel).run(snapshot, now));
            }
        }
        outcome
    }

    fn inspect_one(&self, path: &Path, now: DateTime<Utc>) -> RepositoryOutcome {
        let mut outcome = RepositoryOutcome::new(path);
        if self.is_cancelled() {
            outcome.skipped = true;
            return outcome;
        }
        match inspect(path, now) {
            Ok(snapshot) => {
                write_status_record(&self.config.status_dir(), &snapshot);
                outcome.snapshot = Some(snapshot);
            }
            Err(e) => {
                error!("cannot inspect {}: {e}", path.display());
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    /// Snapshots only; repositories are not modified and no lock is taken.
    pub fn status(&self, now: DateTime<Utc>) -> Result<BackupRun> {
        let repositories: Vec<RepositoryOutcome> = self
            .repositories()?
            .par_iter()
            .map(|path| self.inspect_one(path, now))
            .collect();
        Ok(BackupRun {
            started_at: now,
            operated: false,
            repositories,
            cancelled: self.is_cancelled(),
        })
    }

    pub fn scan(&self, now: DateTime<Utc>) -> Result<ScanRun> {
        let _lock = self.lock(SCAN_LOCK)?;
        let scanner = Scanner::new(&self.config)?;
        let repos = self.repositories()?;

        let repositories: Vec<RepositoryScan> = repos
            .par_iter()
            .map(|path| {
                if self.is_cancelled() {
                    RepositoryScan::not_run(path)
                } else {
                    scanner.scan(path, now)
                }
            })
            .collect();

        Ok(ScanRun {
            started_at: now,
            repositories,
            cancelled: self.is_cancelled(),
        })
    }

    /// Create and prune archives for the named sets, or all sets when
    /// `only` is empty. Sets run one after another.
    pub fn archive(&self, only: &[String], now: DateTime<Utc>) -> Result<ArchiveRun> {
        for name in only {
            if !self.config.backup_sets.iter().any(|s| &s.name == name) {
                return Err(GuardError::Config(format!("unknown backup set `{name}`")));
            }
        }
        let _lock = self.lock(ARCHIVE_LOCK)?;
        let manager = ArchiveManager::from_config(&self.config);

        let mut sets = Vec::new();
        for set in &self.config.backup_sets {
            if !only.is_empty() && !only.contains(&set.name) {
                continue;
            }
            if self.is_cancelled() {
                warn!("cancelled; remaining backup sets skipped");
                break;
            }

            let created = manager.create(set, now).map_err(|e| {
                error!("backup set {} failed: {e}", set.name);
                e.to_string()
            });
            let pruned = match manager.prune(&set.name, &self.config.retention, now) {
                Ok(pruned) => pruned,
                Err(e) => {
                    error!("pruning archives of {} failed: {e}", set.name);
                    Vec::new()
                }
            };
            sets.push(SetOutcome {
                set: set.name.clone(),
                created,
                pruned,
            });
        }

        Ok(ArchiveRun {
            started_at: now,
            sets,
            cancelled: self.is_cancelled(),
        })
    }

    /// Apply the retention tiers to every backup set under the archive lock.
    /// A set that fails to prune is logged and the rest still run.
    pub fn prune_archives(&self, now: DateTime<Utc>) -> Result<Vec<PruneOutcome>> {
        let _lock = self.lock(ARCHIVE_LOCK)?;
        let manager = ArchiveManager::from_config(&self.config);

        let mut outcomes = Vec::new();
        for set in &self.config.backup_sets {
            if self.is_cancelled() {
                warn!("cancelled; remaining backup sets not pruned");
                break;
            }
            let removed = manager
                .prune(&set.name, &self.config.retention, now)
                .map_err(|e| {
                    error!("pruning archives of {} failed: {e}", set.name);
                    e.to_string()
                });
            outcomes.push(PruneOutcome {
                set: set.name.clone(),
                removed,
            });
        }
        Ok(outcomes)
    }
}
