//! # Archive Key Management
//!
//! One symmetric master key protects every encrypted archive.
//!
//! - **Location**: `archive.key_file` from the configuration
//!   (default `<state dir>/keys/archive.key`)
//! - **Format**: raw 32-byte binary data
//! - **Permissions**: 0600 on Unix
//!
//! The key is generated on first use and never regenerated. Replacing it
//! would orphan every archive sealed under the previous key, so
//! [`KeyManager::acquire`] refuses to touch an existing file it cannot parse
//! and [`KeyManager::import_key`] refuses to overwrite.

use crate::crypto::CryptoKey;
use crate::error::{GuardError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key storage and management
pub struct KeyManager {
    key_path: PathBuf,
}

impl KeyManager {
    pub fn new(key_path: impl AsRef<Path>) -> Self {
        Self {
            key_path: key_path.as_ref().to_path_buf(),
        }
    }

    /// Get the path to the key file
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Check whether a key has been created
    pub fn exists(&self) -> bool {
        self.key_path.exists()
    }

    /// Load the key, generating it on first use.
    pub fn acquire(&self) -> Result<CryptoKey> {
        if self.exists() {
            debug!("loading archive key from {}", self.key_path.display());
            return self.load_key();
        }

        let key = CryptoKey::generate();
        self.write_new(&key)?;
        warn!(
            "generated NEW archive key at {}; back it up now, archives cannot be opened without it",
            self.key_path.display()
        );
        Ok(key)
    }

    /// Load the key from disk
    pub fn load_key(&self) -> Result<CryptoKey> {
        if !self.exists() {
            return Err(GuardError::KeyNotFound(self.key_path.clone()));
        }

        let mut file = File::open(&self.key_path)?;
        let mut key_bytes = Vec::new();
        file.read_to_end(&mut key_bytes)?;

        CryptoKey::from_bytes(&key_bytes)
    }

    /// Export key to a file
    pub fn export_key(&self, output_path: impl AsRef<Path>) -> Result<()> {
        let key = self.load_key()?;
        let mut file = File::create(output_path.as_ref())?;
        file.write_all(key.as_bytes())?;
        restrict_permissions(output_path.as_ref())?;
        Ok(())
    }

    /// Import key from a file. Only allowed while no key exists.
    pub fn import_key(&self, input_path: impl AsRef<Path>) -> Result<()> {
        if self.exists() {
            return Err(GuardError::KeyExists(self.key_path.clone()));
        }

        let mut file = File::open(input_path)?;
        let mut key_bytes = Vec::new();
        file.read_to_end(&mut key_bytes)?;

        let key = CryptoKey::from_bytes(&key_bytes)?;
        self.write_new(&key)
    }

    fn write_new(&self, key: &CryptoKey) -> Result<()> {
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // create_new: two concurrent first runs must not both write a key.
        // The mode applies at creation, so the key is never readable by others.
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.key_path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => GuardError::KeyExists(self.key_path.clone()),
                _ => GuardError::Io(e),
            })?;
        file.write_all(key.as_bytes())?;
        file.sync_all()?;
        restrict_permissions(&self.key_path)
    }
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
