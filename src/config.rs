//! Engine configuration.
//!
//! Loaded from `~/.config/repo-guard/config.toml` (or an explicit path) and
//! overridden by `REPO_GUARD_*` environment variables. Nested keys use a
//! double underscore, e.g. `REPO_GUARD_RETENTION__DAILY_DAYS=14`.
//!
//! ```toml
//! search_roots = ["~/code", "~/work"]
//! auto_commit_branches = ["main", "master", "develop"]
//! max_backup_branches = 10
//!
//! [retention]
//! daily_days = 7
//! weekly_days = 30
//! monthly_days = 90
//!
//! [[backup_sets]]
//! name = "ssh"
//! paths = ["~/.ssh/*"]
//! exclude = ["*.sock"]
//! ```
//!
//! The loaded value is passed explicitly to every component; nothing reads
//! configuration from globals.

use crate::error::{GuardError, Result};
use crate::retention::TieredPolicy;
use crate::scan::secrets::SecretCategory;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "REPO_GUARD";
const APP_DIR: &str = "repo-guard";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Directories searched for git working trees.
    pub search_roots: Vec<PathBuf>,
    /// How deep below each root the locator descends.
    pub max_depth: usize,
    /// Branches on which dirty work is committed automatically.
    pub auto_commit_branches: Vec<String>,
    /// Number of `backup/*` branches kept per repository.
    pub max_backup_branches: usize,
    /// Repositories without commits for this many days are flagged stale.
    pub inactivity_days: i64,
    /// Commits whose diffs the secrets scanner inspects.
    pub history_depth: usize,
    /// Files above this size are reported and not content-scanned.
    pub large_file_bytes: u64,
    /// Upper bound for one `git push`.
    pub push_timeout_secs: u64,
    /// Upper bound for one external dependency audit tool.
    pub audit_timeout_secs: u64,
    /// Root for status records, reports, logs, locks and default archive paths.
    pub state_dir: PathBuf,
    pub retention: TieredPolicy,
    pub archive: ArchiveSettings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backup_sets: Vec<BackupSet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secret_patterns: Vec<PatternConfig>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            search_roots: Vec::new(),
            max_depth: 4,
            auto_commit_branches: vec!["main".into(), "master".into(), "develop".into()],
            max_backup_branches: 10,
            inactivity_days: 30,
            history_depth: 50,
            large_file_bytes: 10 * 1024 * 1024,
            push_timeout_secs: 60,
            audit_timeout_secs: 120,
            state_dir: default_state_dir(),
            retention: TieredPolicy::default(),
            archive: ArchiveSettings::default(),
            backup_sets: Vec::new(),
            secret_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Defaults to `<state_dir>/archives`.
    pub dir: Option<PathBuf>,
    /// Defaults to `<state_dir>/keys/archive.key`.
    pub key_file: Option<PathBuf>,
}

/// A named group of paths archived together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSet {
    pub name: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub encrypt: bool,
    #[serde(default = "default_true")]
    pub compress: bool,
}

/// User-supplied detection pattern, appended after the built-in set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub category: SecretCategory,
    pub regex: String,
    #[serde(default)]
    pub case_insensitive: bool,
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| GuardError::Config(format!("invalid config path: {}", path.display())))
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map_err(|e| GuardError::Config(format!("cannot expand {raw}: {e}")))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

impl GuardConfig {
    /// Load configuration from `path`, or from the default location when
    /// `None`. A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(GuardError::Config(format!(
                        "config file not found: {}",
                        explicit.display()
                    )));
                }
                builder = builder.add_source(File::new(path_str(explicit)?, FileFormat::Toml));
            }
            None => {
                if let Some(default) = default_config_path().filter(|p| p.exists()) {
                    builder = builder.add_source(File::new(path_str(&default)?, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("search_roots")
                .with_list_parse_key("auto_commit_branches")
                .try_parsing(true),
        );

        let cfg: GuardConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GuardError::Config(e.to_string()))?;

        cfg.expanded()?.validated()
    }

    fn expanded(mut self) -> Result<Self> {
        self.search_roots = self
            .search_roots
            .iter()
            .map(|p| expand_path(p))
            .collect::<Result<_>>()?;
        self.state_dir = expand_path(&self.state_dir)?;
        if let Some(dir) = self.archive.dir.take() {
            self.archive.dir = Some(expand_path(&dir)?);
        }
        if let Some(key) = self.archive.key_file.take() {
            self.archive.key_file = Some(expand_path(&key)?);
        }
        Ok(self)
    }

    /// Reject configurations no run could succeed with.
    pub fn validated(self) -> Result<Self> {
        if self.max_backup_branches == 0 {
            return Err(GuardError::Config(
                "max_backup_branches must be at least 1".into(),
            ));
        }
        self.retention.validate()?;

        let mut seen = HashSet::new();
        for set in &self.backup_sets {
            if set.name.is_empty()
                || set.name.contains(['/', '\\'])
                || set.name.starts_with('.')
            {
                return Err(GuardError::Config(format!(
                    "invalid backup set name: {:?}",
                    set.name
                )));
            }
            if !seen.insert(set.name.as_str()) {
                return Err(GuardError::Config(format!(
                    "duplicate backup set: {}",
                    set.name
                )));
            }
        }
        Ok(self)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.archive
            .dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("archives"))
    }

    pub fn key_file(&self) -> PathBuf {
        self.archive
            .key_file
            .clone()
            .unwrap_or_else(|| self.state_dir.join("keys").join("archive.key"))
    }

    pub fn status_dir(&self) -> PathBuf {
        self.state_dir.join("status")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.state_dir.join("reports")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.state_dir.join("quarantine")
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GuardError::Config(e.to_string()))
    }
}
