//! Checksum manifest per repository and drift between runs.

use crate::crypto::sha256_file;
use crate::error::Result;
use crate::git::GitRepo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

const MANIFEST_DIR: &str = "repo-guard";
const MANIFEST_FILE: &str = "integrity.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumManifest {
    pub generated_at: DateTime<Utc>,
    /// Relative path (forward slashes) to hex SHA-256.
    pub files: BTreeMap<String, String>,
}

/// Differences against the previous manifest. The three lists are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityDrift {
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub added: Vec<String>,
    /// No previous manifest existed; this run only recorded one.
    pub baseline: bool,
}

impl IntegrityDrift {
    pub fn len(&self) -> usize {
        self.modified.len() + self.deleted.len() + self.added.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct IntegrityMonitor {
    manifest_path: PathBuf,
}

impl IntegrityMonitor {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    /// Manifest stored inside the repository's git directory, where it is
    /// neither tracked nor part of the hashed file set.
    pub fn for_repository(repo: &GitRepo) -> Self {
        Self::new(repo.git_dir().join(MANIFEST_DIR).join(MANIFEST_FILE))
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Hash `files` (relative to `root`), compare with the previous manifest
    /// and overwrite it with the current state.
    pub fn check(&self, root: &Path, files: &[PathBuf], now: DateTime<Utc>) -> Result<IntegrityDrift> {
        let previous = self.load()?;

        let mut current = BTreeMap::new();
        for rel in files {
            let path = root.join(rel);
            if !path.is_file() {
                continue;
            }
            current.insert(manifest_key(rel), sha256_file(&path)?);
        }

        let drift = match previous {
            None => {
                info!("recording integrity baseline at {}", self.manifest_path.display());
                IntegrityDrift {
                    baseline: true,
                    ..IntegrityDrift::default()
                }
            }
            Some((manifest, written)) => diff(&manifest.files, &current, root, written),
        };

        self.store(&ChecksumManifest {
            generated_at: now,
            files: current,
        })?;
        Ok(drift)
    }

    /// The previous manifest and its file modification time.
    fn load(&self) -> Result<Option<(ChecksumManifest, SystemTime)>> {
        if !self.manifest_path.exists() {
            return Ok(None);
        }
        let written = fs::metadata(&self.manifest_path)?.modified()?;
        let manifest = serde_json::from_slice(&fs::read(&self.manifest_path)?)?;
        Ok(Some((manifest, written)))
    }

    fn store(&self, manifest: &ChecksumManifest) -> Result<()> {
        if let Some(parent) = self.manifest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.manifest_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)?;
        fs::rename(&tmp, &self.manifest_path)?;
        Ok(())
    }
}

fn manifest_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn diff(
    previous: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
    root: &Path,
    manifest_written: SystemTime,
) -> IntegrityDrift {
    let mut drift = IntegrityDrift::default();
    for (path, hash) in previous {
        match current.get(path) {
            Some(now) if now != hash => drift.modified.push(path.clone()),
            Some(_) => {}
            None => drift.deleted.push(path.clone()),
        }
    }
    for path in current.keys().filter(|p| !previous.contains_key(*p)) {
        let newer = fs::metadata(root.join(path))
            .and_then(|m| m.modified())
            .map(|mtime| mtime > manifest_written)
            .unwrap_or(false);
        if newer {
            drift.added.push(path.clone());
        } else {
            debug!("{path} is untracked by the previous manifest but predates it");
        }
    }
    drift
}
