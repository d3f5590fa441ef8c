//! Per-repository security checks.
//!
//! Each check runs independently; one failing check never prevents the
//! others from running and is reported as [`CheckStatus::Failed`].

pub mod deps;
pub mod files;
pub mod integrity;
pub mod secrets;

use crate::config::GuardConfig;
use crate::error::{ErrorClass, GuardError, Result};
use crate::git::GitRepo;
use chrono::{DateTime, Utc};
use deps::{Advisory, DependencyAuditor, DependencyStatus};
use files::{FileAuditor, FileFinding};
use integrity::{IntegrityDrift, IntegrityMonitor};
use secrets::{PatternSet, SecretCategory, SecretsScanner};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Directories holding third-party or generated content.
pub(crate) const DEPENDENCY_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "bower_components",
    "target",
    ".venv",
    "venv",
    "__pycache__",
    ".tox",
    ".gradle",
    ".bundle",
];

const TRANSIENT_EXTENSIONS: &[&str] = &["log", "tmp", "temp", "swp", "swo", "bak", "cache"];

/// True for paths inside `.git` or dependency caches, and for log/temp files.
pub(crate) fn is_excluded(rel: &Path) -> bool {
    let in_skipped_dir = rel.components().any(|c| match c {
        Component::Normal(name) => name == OsStr::new(".git") || is_dependency_dir(name),
        _ => false,
    });
    in_skipped_dir
        || rel
            .extension()
            .and_then(OsStr::to_str)
            .map(|ext| TRANSIENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

pub(crate) fn is_dependency_dir(name: &OsStr) -> bool {
    DEPENDENCY_DIRS.iter().any(|d| name == OsStr::new(d))
}

/// NUL byte within the first 8 KiB.
pub(crate) fn is_probably_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|b| *b == 0)
}

/// Outcome of one check; reports keep "clean", "not run" and "failed" apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Clean,
    Issues(usize),
    NotApplicable,
    NotRun,
    Failed(String),
}

impl CheckStatus {
    fn from_count(n: usize) -> Self {
        if n == 0 {
            Self::Clean
        } else {
            Self::Issues(n)
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryScan {
    pub repository: String,
    pub path: PathBuf,
    pub secrets: CheckStatus,
    pub secret_categories: BTreeMap<SecretCategory, usize>,
    pub historical_secrets: usize,
    pub files: CheckStatus,
    pub file_findings: Vec<FileFinding>,
    pub dependencies: CheckStatus,
    pub advisories: Vec<Advisory>,
    pub integrity: CheckStatus,
    pub drift: Option<IntegrityDrift>,
}

impl RepositoryScan {
    /// Every check marked as not run, as for a cancelled repository.
    pub fn not_run(path: &Path) -> Self {
        Self {
            repository: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            path: path.to_path_buf(),
            secrets: CheckStatus::NotRun,
            secret_categories: BTreeMap::new(),
            historical_secrets: 0,
            files: CheckStatus::NotRun,
            file_findings: Vec::new(),
            dependencies: CheckStatus::NotRun,
            advisories: Vec::new(),
            integrity: CheckStatus::NotRun,
            drift: None,
        }
    }

    pub fn has_issues(&self) -> bool {
        [&self.secrets, &self.files, &self.dependencies, &self.integrity]
            .iter()
            .any(|s| matches!(s, CheckStatus::Issues(_)))
    }
}

fn failed(check: &str, repo: &str, err: GuardError) -> CheckStatus {
    match err.class() {
        ErrorClass::NotApplicable => CheckStatus::NotApplicable,
        ErrorClass::Degraded => {
            warn!("{check} check degraded for {repo}: {err}");
            CheckStatus::Failed(err.to_string())
        }
        _ => {
            error!("{check} check failed for {repo}: {err}");
            CheckStatus::Failed(err.to_string())
        }
    }
}

/// Runs every check against one repository.
pub struct Scanner<'a> {
    config: &'a GuardConfig,
    patterns: PatternSet,
}

impl<'a> Scanner<'a> {
    pub fn new(config: &'a GuardConfig) -> Result<Self> {
        Ok(Self {
            config,
            patterns: PatternSet::with_extra(&config.secret_patterns)?,
        })
    }

    /// Never fails: problems are folded into the per-check status.
    pub fn scan(&self, path: &Path, now: DateTime<Utc>) -> RepositoryScan {
        let mut report = RepositoryScan::not_run(path);
        let repo = match GitRepo::open(path) {
            Ok(repo) => repo,
            Err(e) => {
                let status = failed("repository", &report.repository, e);
                report.secrets = status.clone();
                report.files = status.clone();
                report.dependencies = status.clone();
                report.integrity = status;
                return report;
            }
        };
        report.repository = repo.name();
        let name = report.repository.clone();

        let secrets = SecretsScanner::new(
            &self.patterns,
            self.config.history_depth,
            self.config.large_file_bytes,
        );
        match secrets.scan(&repo) {
            Ok(findings) => {
                report.secret_categories = secrets::summarize(&findings);
                report.historical_secrets = findings.iter().filter(|f| f.is_historical()).count();
                report.secrets = CheckStatus::from_count(findings.len());
            }
            Err(e) => report.secrets = failed("secrets", &name, e),
        }

        match FileAuditor::new(self.config.large_file_bytes).audit(repo.workdir()) {
            Ok(findings) => {
                report.files = CheckStatus::from_count(findings.len());
                report.file_findings = findings;
            }
            Err(e) => report.files = failed("file security", &name, e),
        }

        let auditor = DependencyAuditor::new(Duration::from_secs(self.config.audit_timeout_secs));
        match auditor.audit(repo.workdir()) {
            Ok(DependencyStatus::NotApplicable) => {
                report.dependencies = CheckStatus::NotApplicable
            }
            Ok(DependencyStatus::Audited(advisories)) => {
                report.dependencies = CheckStatus::from_count(advisories.len());
                report.advisories = advisories;
            }
            Err(e) => report.dependencies = failed("dependency", &name, e),
        }

        let monitor = IntegrityMonitor::for_repository(&repo);
        let integrity = repo.tracked_files().and_then(|files| {
            let files: Vec<PathBuf> = files.into_iter().filter(|f| !is_excluded(f)).collect();
            monitor.check(repo.workdir(), &files, now)
        });
        match integrity {
            Ok(drift) => {
                report.integrity = CheckStatus::from_count(drift.len());
                report.drift = Some(drift);
            }
            Err(e) => report.integrity = failed("integrity", &name, e),
        }

        info!(
            repository = %name,
            secrets = report.secret_categories.values().sum::<usize>(),
            file_findings = report.file_findings.len(),
            advisories = report.advisories.len(),
            "security scan finished"
        );
        report
    }
}
