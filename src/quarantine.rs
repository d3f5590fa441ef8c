//! Isolation of suspicious files.
//!
//! Quarantine is two explicit steps: [`Quarantine::isolate`] copies the file
//! into the quarantine area and leaves the original alone;
//! [`Quarantine::remove_original`] deletes the original only after checking
//! the copy is byte-identical. Both steps are logged.

use crate::crypto::sha256_file;
use crate::error::{GuardError, Result};
use crate::retention::TIMESTAMP_FORMAT;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

pub struct Quarantine {
    root: PathBuf,
}

impl Quarantine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Copy `file` to `<root>/<timestamp>/<absolute path>` with owner-only
    /// permissions. Returns the copy's path.
    pub fn isolate(&self, file: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
        let source = fs::canonicalize(file)?;
        if !source.is_file() {
            return Err(GuardError::Other(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        let mut dest = self.root.join(now.format(TIMESTAMP_FORMAT).to_string());
        dest.extend(source.components().filter(|c| matches!(c, Component::Normal(_))));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &dest)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(0o600))?;
        }

        info!(
            "quarantined copy of {} at {}; original left in place",
            source.display(),
            dest.display()
        );
        Ok(dest)
    }

    /// Delete `original` once `copy` is confirmed identical to it.
    pub fn remove_original(&self, original: &Path, copy: &Path) -> Result<()> {
        if sha256_file(original)? != sha256_file(copy)? {
            warn!(
                "quarantine copy {} differs from {}; original kept",
                copy.display(),
                original.display()
            );
            return Err(GuardError::Other(format!(
                "quarantine copy of {} does not match the original",
                original.display()
            )));
        }
        fs::remove_file(original)?;
        info!(
            "removed original {} (quarantined at {})",
            original.display(),
            copy.display()
        );
        Ok(())
    }
}
