//! # Security Scan Tests
//!
//! Secrets, file security and integrity checks run against real
//! repositories.
//!
//! ## Test Coverage
//!
//! - Tokens in tracked files and in recent history
//! - Excluded paths are never read
//! - Clean repositories produce no findings
//! - Integrity baseline followed by drift detection
//! - Category-only reporting
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test scan_test
//! ```

mod common;

use chrono::Utc;
use common::{commit_file, create_git_repo, init_repo};
use repo_guard::engine::ScanRun;
use repo_guard::git::GitRepo;
use repo_guard::report;
use repo_guard::scan::integrity::IntegrityMonitor;
use repo_guard::scan::secrets::{PatternSet, SecretCategory, SecretsScanner};
use repo_guard::scan::{CheckStatus, Scanner};
use repo_guard::GuardConfig;
use std::fs::{self, File};
use std::time::{Duration, SystemTime};

fn token() -> String {
    format!("ghp_{}{}", "A1b2C3d4E5f6G7h8I9j0", "K1l2M3n4O5p6Q7r8")
}

#[test]
fn test_token_in_tracked_file_is_found() {
    let repo = create_git_repo();
    commit_file(
        repo.path(),
        "deploy.sh",
        &format!("#!/bin/sh\nexport GH={}\n", token()),
        "add deploy script",
    );

    let patterns = PatternSet::builtin().unwrap();
    let scanner = SecretsScanner::new(&patterns, 50, 1024 * 1024);
    let git_repo = GitRepo::open(repo.path()).unwrap();

    let current = scanner.scan_working_tree(&git_repo).unwrap();
    assert!(current
        .iter()
        .any(|f| f.category == SecretCategory::PlatformToken && !f.is_historical()));
}

#[test]
fn test_removed_token_is_still_found_in_history() {
    let repo = create_git_repo();
    commit_file(repo.path(), "app.env", &format!("TOKEN={}\n", token()), "oops");
    commit_file(repo.path(), "app.env", "TOKEN=\n", "remove token");

    let patterns = PatternSet::builtin().unwrap();
    let scanner = SecretsScanner::new(&patterns, 50, 1024 * 1024);
    let git_repo = GitRepo::open(repo.path()).unwrap();

    assert!(scanner
        .scan_working_tree(&git_repo)
        .unwrap()
        .iter()
        .all(|f| f.category != SecretCategory::PlatformToken));

    let history = scanner.scan_history(&git_repo).unwrap();
    assert!(history
        .iter()
        .any(|f| f.is_historical() && f.category == SecretCategory::PlatformToken));

    let shallow = SecretsScanner::new(&patterns, 1, 1024 * 1024);
    assert!(shallow
        .scan_history(&git_repo)
        .unwrap()
        .iter()
        .all(|f| f.category != SecretCategory::PlatformToken));
}

#[test]
fn test_excluded_and_clean_files_produce_no_findings() {
    let repo = create_git_repo();
    commit_file(repo.path(), "README.md", "# Project\n\nNothing to see.\n", "docs");
    commit_file(
        repo.path(),
        "node_modules/pkg/index.js",
        &format!("const t = '{}';\n", token()),
        "vendored",
    );
    commit_file(repo.path(), "debug.log", &format!("{}\n", token()), "log");

    let patterns = PatternSet::builtin().unwrap();
    let scanner = SecretsScanner::new(&patterns, 50, 1024 * 1024);
    let git_repo = GitRepo::open(repo.path()).unwrap();
    assert!(scanner.scan_working_tree(&git_repo).unwrap().is_empty());

    let empty = PatternSet::empty();
    let scanner = SecretsScanner::new(&empty, 50, 1024 * 1024);
    assert!(scanner.scan(&git_repo).unwrap().is_empty());
}

#[test]
fn test_integrity_baseline_then_drift() {
    let repo = create_git_repo();
    commit_file(repo.path(), "keep.txt", "same\n", "keep");
    commit_file(repo.path(), "edit.txt", "before\n", "edit");
    commit_file(repo.path(), "gone.txt", "bye\n", "gone");

    let config = GuardConfig::default();
    let scanner = Scanner::new(&config).unwrap();

    let first = scanner.scan(repo.path(), Utc::now());
    let drift = first.drift.clone().unwrap();
    assert!(drift.baseline);
    assert_eq!(first.integrity, CheckStatus::Clean);

    let git_repo = GitRepo::open(repo.path()).unwrap();
    let manifest = IntegrityMonitor::for_repository(&git_repo)
        .manifest_path()
        .to_path_buf();
    assert!(manifest.starts_with(git_repo.git_dir()));
    let earlier = SystemTime::now() - Duration::from_secs(3600);
    File::options()
        .write(true)
        .open(&manifest)
        .unwrap()
        .set_modified(earlier)
        .unwrap();

    fs::write(repo.path().join("edit.txt"), "after\n").unwrap();
    fs::remove_file(repo.path().join("gone.txt")).unwrap();
    commit_file(repo.path(), "fresh.txt", "hello\n", "fresh");

    let second = scanner.scan(repo.path(), Utc::now());
    let drift = second.drift.clone().unwrap();
    assert!(!drift.baseline);
    assert_eq!(drift.modified, vec!["edit.txt".to_string()]);
    assert_eq!(drift.deleted, vec!["gone.txt".to_string()]);
    assert_eq!(drift.added, vec!["fresh.txt".to_string()]);
    assert_eq!(second.integrity, CheckStatus::Issues(3));

    let third = scanner.scan(repo.path(), Utc::now());
    assert_eq!(third.integrity, CheckStatus::Clean);
}

#[test]
fn test_security_summary_shows_categories_not_secrets() {
    let temp = tempfile::TempDir::new().unwrap();
    let repo = temp.path().join("leaky");
    init_repo(&repo);
    commit_file(&repo, "ci.yml", &format!("token: {}\n", token()), "ci");

    let config = GuardConfig::default();
    let scanner = Scanner::new(&config).unwrap();
    let run = ScanRun {
        started_at: Utc::now(),
        repositories: vec![scanner.scan(&repo, Utc::now())],
        cancelled: false,
    };
    assert!(run.repositories[0].has_issues());

    let summary = report::security_summary(&run);
    assert!(summary.contains("leaky"));
    assert!(summary.contains("found"));
    assert!(summary.contains(&SecretCategory::PlatformToken.to_string()));
    assert!(!summary.contains(&token()));
}
