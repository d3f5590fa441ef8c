//! Human-readable run summaries.

use crate::engine::{ArchiveRun, BackupRun, RepositoryOutcome, ScanRun};
use crate::error::Result;
use crate::git::Tracking;
use crate::operator::PushOutcome;
use crate::retention::TIMESTAMP_FORMAT;
use crate::scan::CheckStatus;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-repository status category in the backup summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Ok,
    Dirty,
    Ahead,
    Stale,
    Fail,
    Skip,
}

impl Indicator {
    pub const ALL: [Indicator; 6] = [
        Self::Ok,
        Self::Dirty,
        Self::Ahead,
        Self::Stale,
        Self::Fail,
        Self::Skip,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Ok => "[ OK  ]",
            Self::Dirty => "[DIRTY]",
            Self::Ahead => "[AHEAD]",
            Self::Stale => "[STALE]",
            Self::Fail => "[FAIL ]",
            Self::Skip => "[SKIP ]",
        }
    }

    pub fn meaning(self) -> &'static str {
        match self {
            Self::Ok => "clean and in sync with its upstream",
            Self::Dirty => "uncommitted changes were found",
            Self::Ahead => "local commits not yet on the remote",
            Self::Stale => "no commits within the inactivity threshold",
            Self::Fail => "a git operation failed; remaining stages skipped",
            Self::Skip => "not processed because the run was cancelled",
        }
    }

    /// Worst condition wins.
    pub fn for_outcome(outcome: &RepositoryOutcome, inactivity_days: i64) -> Self {
        if outcome.failed() {
            return Self::Fail;
        }
        let Some(snapshot) = &outcome.snapshot else {
            return Self::Skip;
        };
        if outcome.skipped {
            Self::Skip
        } else if snapshot.dirty {
            Self::Dirty
        } else if snapshot.is_ahead() {
            Self::Ahead
        } else if snapshot.is_stale(inactivity_days) {
            Self::Stale
        } else {
            Self::Ok
        }
    }
}

pub fn backup_summary(run: &BackupRun, inactivity_days: i64) -> String {
    let mut out = String::new();
    let title = if run.operated { "Backup summary" } else { "Repository status" };
    let _ = writeln!(out, "{title} - {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "{} repositories\n", run.repositories.len());

    let width = name_width(run.repositories.iter().map(RepositoryOutcome::name));
    let mut counts = [0usize; 6];

    for outcome in &run.repositories {
        let indicator = Indicator::for_outcome(outcome, inactivity_days);
        counts[Indicator::ALL.iter().position(|i| *i == indicator).unwrap_or(0)] += 1;
        let _ = write!(out, "{} {:<width$}", indicator.tag(), outcome.name());

        if let Some(error) = &outcome.error {
            let _ = writeln!(out, "  error: {error}");
            continue;
        }
        let Some(snapshot) = &outcome.snapshot else {
            let _ = writeln!(out);
            continue;
        };

        let tracking = match &snapshot.tracking {
            Tracking::NoUpstream => "no upstream".to_string(),
            Tracking::Tracking { ahead, behind, .. } => format!("+{ahead}/-{behind}"),
        };
        let last = match (&snapshot.last_commit, snapshot.inactive_days) {
            (Some(c), Some(days)) => format!("{} {days}d ago", c.id),
            _ => "none".to_string(),
        };
        let _ = write!(
            out,
            "  {:<16} untracked {} staged {} modified {} stashes {}  {tracking}  last {last}",
            snapshot.branch,
            snapshot.changes.untracked,
            snapshot.changes.staged,
            snapshot.changes.modified,
            snapshot.stashes,
        );

        if let Some(op) = &outcome.operator {
            let mut actions = Vec::new();
            if let Some(id) = &op.committed {
                actions.push(format!("committed {id}"));
            }
            if let Some(branch) = &op.backup_branch {
                actions.push(format!("branch {branch}"));
            }
            match &op.push {
                PushOutcome::Pushed { backup_branches, failed } => actions.push(format!(
                    "pushed (+{backup_branches} backups{})",
                    if *failed > 0 { format!(", {failed} failed") } else { String::new() }
                )),
                PushOutcome::Skipped(reason) => actions.push(format!("push skipped: {reason}")),
                PushOutcome::UpToDate | PushOutcome::NotAttempted => {}
            }
            if !op.pruned.is_empty() {
                actions.push(format!("pruned {}", op.pruned.len()));
            }
            if let Some(failure) = &op.failure {
                actions.push(format!("failed: {failure}"));
            }
            if op.cancelled {
                actions.push("cancelled".into());
            }
            if !actions.is_empty() {
                let _ = write!(out, "  [{}]", actions.join("; "));
            }
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out);
    let totals: Vec<String> = Indicator::ALL
        .iter()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .map(|(i, n)| format!("{} {n}", i.tag().trim_matches(|c| c == '[' || c == ']').trim()))
        .collect();
    let _ = writeln!(out, "Totals: {}", totals.join(", "));
    if run.cancelled {
        let _ = writeln!(out, "Run was cancelled before completion.");
    }

    let _ = writeln!(out, "\nLegend:");
    for indicator in Indicator::ALL {
        let _ = writeln!(out, "  {}  {}", indicator.tag(), indicator.meaning());
    }
    out
}

fn cell(status: &CheckStatus) -> String {
    match status {
        CheckStatus::Clean => "clean".into(),
        CheckStatus::Issues(n) => format!("{n} found"),
        CheckStatus::NotApplicable => "n/a".into(),
        CheckStatus::NotRun => "not run".into(),
        CheckStatus::Failed(_) => "FAILED".into(),
    }
}

/// One row per repository, one column per check. Secret findings appear
/// only as counts per category.
pub fn security_summary(run: &ScanRun) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Security summary - {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "{} repositories\n", run.repositories.len());

    let width = name_width(run.repositories.iter().map(|r| r.repository.clone()));
    let _ = writeln!(
        out,
        "{:<width$}  {:<10}  {:<10}  {:<12}  {:<10}",
        "REPOSITORY", "SECRETS", "FILES", "DEPENDENCIES", "INTEGRITY"
    );
    for scan in &run.repositories {
        let integrity = match &scan.drift {
            Some(drift) if drift.baseline => "baseline".to_string(),
            _ => cell(&scan.integrity),
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<10}  {:<10}  {:<12}  {:<10}",
            scan.repository,
            cell(&scan.secrets),
            cell(&scan.files),
            cell(&scan.dependencies),
            integrity
        );
    }

    let flagged: Vec<_> = run.repositories.iter().filter(|r| r.has_issues()).collect();
    if !flagged.is_empty() {
        let _ = writeln!(out, "\nDetails:");
    }
    for scan in flagged {
        let _ = writeln!(out, "  {}", scan.repository);
        if !scan.secret_categories.is_empty() {
            let categories: Vec<String> = scan
                .secret_categories
                .iter()
                .map(|(c, n)| format!("{c}: {n}"))
                .collect();
            let _ = writeln!(
                out,
                "    secrets: {} ({} in history)",
                categories.join(", "),
                scan.historical_secrets
            );
        }
        for finding in &scan.file_findings {
            let _ = writeln!(out, "    {}: {}", finding.issue, finding.path.display());
        }
        for advisory in &scan.advisories {
            let _ = writeln!(
                out,
                "    {} {}: {}",
                advisory.ecosystem, advisory.package, advisory.detail
            );
        }
        if let Some(drift) = scan.drift.as_ref().filter(|d| !d.is_empty()) {
            let _ = writeln!(
                out,
                "    integrity: {} modified, {} deleted, {} new",
                drift.modified.len(),
                drift.deleted.len(),
                drift.added.len()
            );
            for path in &drift.modified {
                let _ = writeln!(out, "      M {path}");
            }
            for path in &drift.deleted {
                let _ = writeln!(out, "      D {path}");
            }
            for path in &drift.added {
                let _ = writeln!(out, "      A {path}");
            }
        }
    }
    if run.cancelled {
        let _ = writeln!(out, "\nRun was cancelled before completion.");
    }

    let _ = writeln!(out, "\nLegend:");
    for (label, meaning) in [
        ("clean", "check ran and found nothing"),
        ("N found", "check ran and reported N issues"),
        ("n/a", "nothing to check (no manifest or tool)"),
        ("not run", "check did not run"),
        ("FAILED", "check could not complete; see the log"),
        ("baseline", "first integrity run; checksums recorded"),
    ] {
        let _ = writeln!(out, "  {label:<9} {meaning}");
    }
    out
}

pub fn archive_summary(run: &ArchiveRun) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Archive summary - {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for set in &run.sets {
        let status = match &set.created {
            Ok(Some(entry)) => format!("created {}", entry.path.display()),
            Ok(None) => "skipped (no files)".to_string(),
            Err(e) => format!("FAILED: {e}"),
        };
        let _ = writeln!(out, "  {:<16} {status}", set.set);
        if !set.pruned.is_empty() {
            let _ = writeln!(out, "  {:<16} pruned {} old archives", "", set.pruned.len());
        }
    }
    if run.cancelled {
        let _ = writeln!(out, "Run was cancelled before completion.");
    }
    out
}

fn name_width(names: impl Iterator<Item = String>) -> usize {
    names.map(|n| n.chars().count()).max().unwrap_or(0).max(10)
}

/// Write `body` to `<dir>/<kind>-<timestamp>.txt`.
pub fn write_report(dir: &Path, kind: &str, at: DateTime<Utc>, body: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{kind}-{}.txt", at.format(TIMESTAMP_FORMAT)));
    fs::write(&path, body)?;
    Ok(path)
}
