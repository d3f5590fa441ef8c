use assert_cmd::{cargo::cargo_bin_cmd, Command};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use tempfile::TempDir;

/// Run git in `dir` and return its trimmed stdout, panicking on failure.
#[allow(dead_code)]
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialise a repository at `path` on branch `main` with user config set.
#[allow(dead_code)]
pub fn init_repo(path: &Path) {
    fs::create_dir_all(path).expect("failed to create repo dir");
    git(path, &["init", "--quiet"]);
    git(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "commit.gpgsign", "false"]);
}

/// Create a new temporary git repository with user config set.
#[allow(dead_code)]
pub fn create_git_repo() -> TempDir {
    let temp = TempDir::new().expect("failed to create temp dir");
    init_repo(temp.path());
    temp
}

/// Write `name` with `content` and commit it.
#[allow(dead_code)]
pub fn commit_file(repo: &Path, name: &str, content: &str, message: &str) {
    let path = repo.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    fs::write(&path, content).expect("failed to write file");
    git(repo, &["add", name]);
    git(repo, &["commit", "--quiet", "-m", message]);
}

/// Create a bare repository at `path` and register it as `origin` of `repo`.
#[allow(dead_code)]
pub fn add_bare_remote(repo: &Path, path: &Path) {
    fs::create_dir_all(path).expect("failed to create remote dir");
    git(path, &["init", "--quiet", "--bare"]);
    let url = path.to_str().expect("non-utf8 temp path");
    git(repo, &["remote", "add", "origin", url]);
}

/// Names of local branches under `backup/`.
#[allow(dead_code)]
pub fn backup_branches(repo: &Path) -> Vec<String> {
    git(repo, &["branch", "--list", "backup/*", "--format=%(refname:short)"])
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect()
}

#[allow(dead_code)]
pub fn current_branch(repo: &Path) -> String {
    git(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
}

#[allow(dead_code)]
pub fn is_clean(repo: &Path) -> bool {
    git(repo, &["status", "--porcelain"]).is_empty()
}

/// Write a config file under `temp` that keeps all state inside it.
#[allow(dead_code)]
pub fn write_config(temp: &Path, search_root: &Path, extra: &str) -> PathBuf {
    let path = temp.join("config.toml");
    let body = format!(
        "search_roots = [{root:?}]\nstate_dir = {state:?}\n{extra}\n",
        root = search_root.display().to_string(),
        state = temp.join("state").display().to_string(),
    );
    fs::write(&path, body).expect("failed to write config");
    path
}

/// Convenience helper for spawning the repo-guard binary via assert_cmd.
#[allow(dead_code)]
pub fn repo_guard_cmd() -> Command {
    let mut cmd = cargo_bin_cmd!("repo-guard");
    cmd.env_remove("RUST_LOG");
    cmd
}
