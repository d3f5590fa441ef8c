//! # Backup Run Tests
//!
//! End-to-end runs of the engine's backup pass against real repositories
//! created with the git CLI.
//!
//! ## Test Coverage
//!
//! - Clean, up-to-date repositories are left alone
//! - Dirty allowlisted branches are committed and branched
//! - Dirty branches outside the allowlist are untouched unless forced
//! - Pushing to a local bare remote, backup branches included
//! - Pruning of old backup branches
//! - Same-second backups get distinct branch names
//! - Unreachable or hanging remotes degrade the push instead of failing
//! - Cancellation between stages
//! - Per-repository failure isolation
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test operator_test
//! ```

mod common;

use chrono::{TimeZone, Utc};
use common::{
    add_bare_remote, backup_branches, commit_file, current_branch, git, init_repo, is_clean,
};
use repo_guard::operator::{GitOperator, OperatorSettings, PushOutcome, Stage};
use repo_guard::snapshot::inspect;
use repo_guard::{Engine, GuardConfig};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn engine_for(temp: &TempDir, repos: &Path) -> Engine {
    Engine::new(GuardConfig {
        search_roots: vec![repos.to_path_buf()],
        state_dir: temp.path().join("state"),
        ..GuardConfig::default()
    })
}

fn outcome<'a>(
    run: &'a repo_guard::engine::BackupRun,
    name: &str,
) -> &'a repo_guard::engine::RepositoryOutcome {
    run.repositories
        .iter()
        .find(|o| o.name() == name)
        .unwrap_or_else(|| panic!("no outcome for {name}"))
}

#[test]
fn test_clean_repository_with_upstream_is_untouched() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("clean");
    init_repo(&repo);
    commit_file(&repo, "README.md", "hello\n", "initial");
    add_bare_remote(&repo, &temp.path().join("remote.git"));
    git(&repo, &["push", "--quiet", "-u", "origin", "main"]);
    let head = git(&repo, &["rev-parse", "HEAD"]);

    let run = engine_for(&temp, &repos).backup(false, Utc::now()).unwrap();

    let result = outcome(&run, "clean");
    let report = result.operator.as_ref().unwrap();
    assert!(report.committed.is_none());
    assert!(report.backup_branch.is_none());
    assert_eq!(report.push, PushOutcome::UpToDate);
    assert!(report.failure.is_none());
    assert_eq!(git(&repo, &["rev-parse", "HEAD"]), head);
    assert!(backup_branches(&repo).is_empty());
}

#[test]
fn test_dirty_main_without_remote_is_committed_and_branched() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("dirty");
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");
    fs::write(repo.join("a.txt"), "two\n").unwrap();
    fs::write(repo.join("b.txt"), "new\n").unwrap();

    let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
    let run = engine_for(&temp, &repos).backup(false, now).unwrap();

    let result = outcome(&run, "dirty");
    assert!(result.snapshot.as_ref().unwrap().dirty);
    let report = result.operator.as_ref().unwrap();
    assert!(report.committed.is_some());
    assert_eq!(
        report.backup_branch.as_deref(),
        Some("backup/20260314_092653_main")
    );
    assert!(matches!(report.push, PushOutcome::Skipped(_)));
    assert!(report.failure.is_none());

    assert_eq!(current_branch(&repo), "main");
    assert!(is_clean(&repo));
    assert_eq!(backup_branches(&repo), vec!["backup/20260314_092653_main"]);
    let message = git(&repo, &["log", "-1", "--format=%s"]);
    assert!(message.starts_with("WIP backup commit"), "{message}");
    assert_eq!(git(&repo, &["show", "HEAD:b.txt"]), "new");
}

#[test]
fn test_dirty_feature_branch_is_left_alone() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("feature");
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");
    git(&repo, &["checkout", "--quiet", "-b", "feature/x"]);
    fs::write(repo.join("a.txt"), "changed\n").unwrap();
    let head = git(&repo, &["rev-parse", "HEAD"]);

    let run = engine_for(&temp, &repos).backup(false, Utc::now()).unwrap();

    let report = outcome(&run, "feature").operator.as_ref().unwrap();
    assert!(report.committed.is_none());
    assert!(report.backup_branch.is_none());
    assert_eq!(current_branch(&repo), "feature/x");
    assert_eq!(git(&repo, &["rev-parse", "HEAD"]), head);
    assert!(!is_clean(&repo));
    assert!(backup_branches(&repo).is_empty());
}

#[test]
fn test_force_backs_up_feature_branch_without_committing_on_it() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("forced");
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");
    git(&repo, &["checkout", "--quiet", "-b", "feature/x"]);
    fs::write(repo.join("a.txt"), "changed\n").unwrap();
    fs::write(repo.join("notes.txt"), "draft\n").unwrap();
    let head = git(&repo, &["rev-parse", "HEAD"]);

    let run = engine_for(&temp, &repos).backup(true, Utc::now()).unwrap();

    let report = outcome(&run, "forced").operator.as_ref().unwrap();
    assert!(report.committed.is_none());
    let branch = report.backup_branch.clone().expect("backup branch");
    assert!(branch.starts_with("backup/"));
    assert!(branch.ends_with("_feature/x"));

    assert_eq!(current_branch(&repo), "feature/x");
    assert_eq!(git(&repo, &["rev-parse", "HEAD"]), head);
    assert!(is_clean(&repo));
    assert_eq!(fs::read_to_string(repo.join("a.txt")).unwrap(), "one\n");
    assert!(!repo.join("notes.txt").exists());

    assert_eq!(git(&repo, &["show", &format!("{branch}:a.txt")]), "changed");
    assert_eq!(git(&repo, &["show", &format!("{branch}:notes.txt")]), "draft");
    assert_eq!(git(&repo, &["rev-parse", &format!("{branch}~1")]), head);
}

#[test]
fn test_ahead_branch_and_backups_are_pushed() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("ahead");
    let remote = temp.path().join("remote.git");
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");
    add_bare_remote(&repo, &remote);
    git(&repo, &["push", "--quiet", "-u", "origin", "main"]);
    fs::write(repo.join("a.txt"), "two\n").unwrap();

    let run = engine_for(&temp, &repos).backup(false, Utc::now()).unwrap();

    let report = outcome(&run, "ahead").operator.as_ref().unwrap();
    assert!(report.committed.is_some());
    assert_eq!(
        report.push,
        PushOutcome::Pushed {
            backup_branches: 1,
            failed: 0
        }
    );

    let local = git(&repo, &["rev-parse", "HEAD"]);
    assert_eq!(git(&remote, &["rev-parse", "refs/heads/main"]), local);
    let branch = report.backup_branch.clone().unwrap();
    git(&remote, &["rev-parse", "--verify", &format!("refs/heads/{branch}")]);
}

#[test]
fn test_old_backup_branches_are_pruned() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("crowded");
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");
    for day in 1..=12 {
        git(&repo, &["branch", &format!("backup/202601{day:02}_120000_main")]);
    }
    git(&repo, &["branch", "backup/not-a-timestamp"]);

    let run = engine_for(&temp, &repos).backup(false, Utc::now()).unwrap();

    let report = outcome(&run, "crowded").operator.as_ref().unwrap();
    assert_eq!(
        report.pruned,
        vec![
            "backup/20260101_120000_main".to_string(),
            "backup/20260102_120000_main".to_string(),
        ]
    );
    let remaining = backup_branches(&repo);
    assert_eq!(remaining.len(), 11);
    assert!(remaining.contains(&"backup/not-a-timestamp".to_string()));
    assert!(remaining.contains(&"backup/20260112_120000_main".to_string()));
}

#[test]
fn test_second_backup_in_same_second_gets_suffixed_branch() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("busy");
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");
    let engine = engine_for(&temp, &repos);
    let now = Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap();

    fs::write(repo.join("a.txt"), "two\n").unwrap();
    let first = engine.backup(false, now).unwrap();
    assert!(!outcome(&first, "busy").failed());

    fs::write(repo.join("a.txt"), "three\n").unwrap();
    let second = engine.backup(false, now).unwrap();
    let result = outcome(&second, "busy");
    assert!(!result.failed());
    let report = result.operator.as_ref().unwrap();
    assert!(report.committed.is_some());
    assert_eq!(
        report.backup_branch.as_deref(),
        Some("backup/20261017_083000-2_main")
    );

    assert_eq!(
        backup_branches(&repo),
        vec![
            "backup/20261017_083000-2_main",
            "backup/20261017_083000_main",
        ]
    );
    assert!(is_clean(&repo));
}

/// Repository at `repos/<name>` tracking a bare remote, with one unpushed
/// edit in the working tree.
fn repository_with_upstream(temp: &TempDir, name: &str) -> std::path::PathBuf {
    let repo = temp.path().join("repos").join(name);
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");
    add_bare_remote(&repo, &temp.path().join(format!("{name}.git")));
    git(&repo, &["push", "--quiet", "-u", "origin", "main"]);
    fs::write(repo.join("a.txt"), "two\n").unwrap();
    repo
}

fn settings(push_timeout: Duration) -> OperatorSettings {
    OperatorSettings {
        push_timeout,
        ..OperatorSettings::from_config(&GuardConfig::default(), false)
    }
}

#[test]
fn test_unreachable_remote_degrades_push() {
    let temp = TempDir::new().unwrap();
    let repo = repository_with_upstream(&temp, "offline");
    fs::remove_dir_all(temp.path().join("offline.git")).unwrap();

    let run = engine_for(&temp, &temp.path().join("repos"))
        .backup(false, Utc::now())
        .unwrap();

    let result = outcome(&run, "offline");
    assert!(!result.failed());
    let report = result.operator.as_ref().unwrap();
    assert!(report.committed.is_some());
    assert!(report.backup_branch.is_some());
    assert!(matches!(report.push, PushOutcome::Skipped(_)), "{:?}", report.push);
    assert!(report.failure.is_none());
    assert!(is_clean(&repo));
}

#[test]
fn test_hanging_remote_push_times_out_and_degrades() {
    let temp = TempDir::new().unwrap();
    let repo = repository_with_upstream(&temp, "stalled");
    // The ext transport runs a command that never answers.
    git(&repo, &["config", "protocol.ext.allow", "always"]);
    git(&repo, &["remote", "set-url", "origin", "ext::sleep 30"]);

    let settings = settings(Duration::from_millis(500));
    let cancel = AtomicBool::new(false);
    let snapshot = inspect(&repo, Utc::now()).unwrap();

    let started = Instant::now();
    let report = GitOperator::new(&settings, &cancel).run(&snapshot, Utc::now());
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(report.failure.is_none());
    assert!(report.committed.is_some());
    match &report.push {
        PushOutcome::Skipped(reason) => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected a degraded push, got {other:?}"),
    }
    assert!(!report.cancelled);
}

#[test]
fn test_cancel_after_commit_skips_remaining_stages() {
    let temp = TempDir::new().unwrap();
    let repo = repository_with_upstream(&temp, "interrupted");
    let remote_head = git(&repo, &["rev-parse", "origin/main"]);

    let settings = settings(Duration::from_secs(30));
    let cancel = AtomicBool::new(false);
    let cancel_after_commit = |stage: Stage| {
        if stage == Stage::Commit {
            cancel.store(true, Ordering::SeqCst);
        }
    };
    let snapshot = inspect(&repo, Utc::now()).unwrap();

    let report = GitOperator::new(&settings, &cancel)
        .on_stage(&cancel_after_commit)
        .run(&snapshot, Utc::now());

    assert!(report.cancelled);
    assert!(report.failure.is_none());
    assert!(report.committed.is_some());
    assert!(report.backup_branch.is_none());
    assert_eq!(report.push, PushOutcome::NotAttempted);
    assert!(report.pruned.is_empty());

    assert!(is_clean(&repo));
    assert!(backup_branches(&repo).is_empty());
    let remote = temp.path().join("interrupted.git");
    assert_eq!(git(&remote, &["rev-parse", "refs/heads/main"]), remote_head);
}

#[test]
fn test_cancel_before_run_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let repo = repository_with_upstream(&temp, "untouched");
    let head = git(&repo, &["rev-parse", "HEAD"]);

    let settings = settings(Duration::from_secs(30));
    let cancel = AtomicBool::new(true);
    let snapshot = inspect(&repo, Utc::now()).unwrap();
    let report = GitOperator::new(&settings, &cancel).run(&snapshot, Utc::now());

    assert!(report.cancelled);
    assert!(report.committed.is_none());
    assert_eq!(report.push, PushOutcome::NotAttempted);
    assert_eq!(git(&repo, &["rev-parse", "HEAD"]), head);
    assert!(!is_clean(&repo));
}

#[test]
fn test_failure_in_one_repository_does_not_stop_others() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");

    let detached = repos.join("detached");
    init_repo(&detached);
    commit_file(&detached, "a.txt", "one\n", "initial");
    git(&detached, &["checkout", "--quiet", "--detach"]);
    fs::write(detached.join("a.txt"), "edited\n").unwrap();

    let healthy = repos.join("healthy");
    init_repo(&healthy);
    commit_file(&healthy, "a.txt", "one\n", "initial");
    fs::write(healthy.join("a.txt"), "two\n").unwrap();

    let run = engine_for(&temp, &repos).backup(false, Utc::now()).unwrap();
    assert_eq!(run.repositories.len(), 2);

    let failed = outcome(&run, "detached");
    assert!(failed.failed());
    assert!(!is_clean(&detached));

    let ok = outcome(&run, "healthy");
    assert!(!ok.failed());
    assert!(ok.operator.as_ref().unwrap().committed.is_some());
    assert!(is_clean(&healthy));
}

#[test]
fn test_status_records_are_written() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    let repo = repos.join("recorded");
    init_repo(&repo);
    commit_file(&repo, "a.txt", "one\n", "initial");

    let engine = engine_for(&temp, &repos);
    let run = engine.status(Utc::now()).unwrap();
    assert!(!run.operated);

    let records: Vec<_> = fs::read_dir(engine.config().status_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].starts_with("recorded-"));
    assert!(records[0].ends_with(".json"));
}

#[test]
fn test_same_named_repositories_keep_separate_status_records() {
    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    for group in ["work", "personal"] {
        let repo = repos.join(group).join("api");
        init_repo(&repo);
        commit_file(&repo, "a.txt", group, "initial");
    }

    let engine = engine_for(&temp, &repos);
    let run = engine.status(Utc::now()).unwrap();
    assert_eq!(run.repositories.len(), 2);

    let records = fs::read_dir(engine.config().status_dir()).unwrap().count();
    assert_eq!(records, 2);
}
