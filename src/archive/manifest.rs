use crate::error::{GuardError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Companion record of one archive.
///
/// The size and checksum fields are written empty before encryption and
/// filled in only once the artifact is complete; an archive whose manifest
/// still lacks them is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: u32,
    pub set: String,
    pub created_at: DateTime<Utc>,
    pub host: String,
    pub user: String,
    pub encrypted: bool,
    pub compressed: bool,
    pub sources: Vec<PathBuf>,
    /// Size of the tar(.gz) before encryption.
    pub plaintext_size: Option<u64>,
    /// Size of the stored artifact.
    pub ciphertext_size: Option<u64>,
    /// Hex SHA-256 of the stored artifact.
    pub ciphertext_sha256: Option<String>,
}

impl ArchiveManifest {
    pub fn new(
        set: &str,
        created_at: DateTime<Utc>,
        sources: Vec<PathBuf>,
        encrypted: bool,
        compressed: bool,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            set: set.to_string(),
            created_at,
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".into()),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".into()),
            encrypted,
            compressed,
            sources,
            plaintext_size: None,
            ciphertext_size: None,
            ciphertext_sha256: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.plaintext_size.is_some()
            && self.ciphertext_size.is_some()
            && self.ciphertext_sha256.is_some()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            GuardError::InvalidManifest(format!("{}: {e}", path.display()))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GuardError::InvalidManifest(format!("{}: {e}", path.display())))
    }

    /// Write via a temporary file and rename.
    pub fn store(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// `<archive>.manifest.json`
pub fn manifest_path_for(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(MANIFEST_SUFFIX);
    PathBuf::from(name)
}
