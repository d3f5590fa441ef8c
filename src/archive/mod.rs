//! # Encrypted Archive Manager
//!
//! Sealed backups of configured path sets that live outside repositories.
//!
//! ## Layout
//!
//! ```text
//! <archive dir>/<set>/<set>_<YYYYmmdd_HHMMSS>.tar.gz.enc
//! <archive dir>/<set>/<set>_<YYYYmmdd_HHMMSS>.tar.gz.enc.manifest.json
//! ```
//!
//! `.tar.gz` is replaced by `.tar` when compression is off, and `.enc` is
//! dropped when encryption is off.
//!
//! ## Creation
//!
//! The plaintext tarball is built as a hidden `.partial` file next to the
//! final artifact and removed on every exit path, including failures. The
//! manifest is written before encryption with blank size/checksum fields and
//! backfilled afterwards, so an interrupted run leaves an archive that
//! [`ArchiveManager::verify`] rejects.
//!
//! ## Size limit
//!
//! Sealing, verification and restore hold one whole tarball in memory (AES-GCM
//! authenticates the payload as a single message). Tarballs and artifacts
//! larger than [`MAX_IN_MEMORY_BYTES`] are refused before anything is read,
//! so backup sets are meant for dotfiles, keys and configuration rather than
//! bulk data.

pub mod manifest;
pub mod resolve;

pub use manifest::{manifest_path_for, ArchiveManifest, MANIFEST_SUFFIX};
pub use resolve::{entry_name, resolve_paths};

use crate::config::{BackupSet, GuardConfig};
use crate::crypto::{sha256_hex, CryptoKey};
use crate::error::{GuardError, Result};
use crate::key::KeyManager;
use crate::retention::{TieredPolicy, TIMESTAMP_FORMAT};
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PARTIAL_SUFFIX: &str = ".partial";

/// Largest tarball or sealed artifact read into memory.
pub const MAX_IN_MEMORY_BYTES: u64 = 1 << 30;

/// One stored archive as found on disk.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub set: String,
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    /// `None` when the manifest is missing or unreadable.
    pub manifest: Option<ArchiveManifest>,
}

impl ArchiveEntry {
    /// Manifest present and backfilled.
    pub fn is_valid(&self) -> bool {
        self.manifest.as_ref().is_some_and(ArchiveManifest::is_complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub archive: PathBuf,
    pub manifest_complete: bool,
    pub checksum_ok: bool,
    /// The artifact decrypts (if sealed) and reads as a complete tarball.
    pub opens: bool,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        self.manifest_complete && self.checksum_ok && self.opens
    }
}

/// Removes the plaintext intermediate when dropped.
struct PlaintextGuard(PathBuf);

impl Drop for PlaintextGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => debug!("removed plaintext {}", self.0.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove plaintext {}: {e}", self.0.display()),
        }
    }
}

pub struct ArchiveManager {
    root: PathBuf,
    keys: KeyManager,
    max_bytes: u64,
}

impl ArchiveManager {
    pub fn new(root: impl Into<PathBuf>, key_file: impl AsRef<Path>) -> Self {
        Self {
            root: root.into(),
            keys: KeyManager::new(key_file),
            max_bytes: MAX_IN_MEMORY_BYTES,
        }
    }

    /// Lower the in-memory size limit.
    pub fn with_size_limit(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes.min(MAX_IN_MEMORY_BYTES);
        self
    }

    /// Read `path` whole, refusing files above the size limit.
    fn read_bounded(&self, path: &Path) -> Result<Vec<u8>> {
        let len = fs::metadata(path)?.len();
        if len > self.max_bytes {
            return Err(GuardError::Archive(format!(
                "{} is {len} bytes, above the {} byte in-memory limit",
                path.display(),
                self.max_bytes
            )));
        }
        Ok(fs::read(path)?)
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.archive_dir(), config.key_file())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Archive one backup set. `Ok(None)` when its patterns match no files.
    pub fn create(&self, set: &BackupSet, now: DateTime<Utc>) -> Result<Option<ArchiveEntry>> {
        let files = resolve_paths(&set.paths, &set.exclude)?;
        if files.is_empty() {
            info!("backup set {} matched no files; skipped", set.name);
            return Ok(None);
        }

        let key = if set.encrypt {
            Some(self.keys.acquire()?)
        } else {
            None
        };

        let dir = self.root.join(&set.name);
        fs::create_dir_all(&dir)?;
        self.remove_partials(&dir);

        let tar_name = format!(
            "{}_{}.{}",
            set.name,
            now.format(TIMESTAMP_FORMAT),
            if set.compress { "tar.gz" } else { "tar" }
        );
        let artifact = if set.encrypt {
            dir.join(format!("{tar_name}.enc"))
        } else {
            dir.join(&tar_name)
        };
        if artifact.exists() {
            return Err(GuardError::Archive(format!(
                "{} already exists",
                artifact.display()
            )));
        }
        let manifest_path = manifest_path_for(&artifact);

        let plaintext = PlaintextGuard(dir.join(format!(".{tar_name}{PARTIAL_SUFFIX}")));
        let plaintext_size = write_tarball(&plaintext.0, &files, set.compress)?;

        let mut manifest =
            ArchiveManifest::new(&set.name, now, files.clone(), set.encrypt, set.compress);
        manifest.store(&manifest_path)?;

        let sealed = self.seal(&plaintext.0, &artifact, key.as_ref());
        drop(plaintext);

        let (size, checksum) = match sealed {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&manifest_path);
                return Err(e);
            }
        };

        manifest.plaintext_size = Some(plaintext_size);
        manifest.ciphertext_size = Some(size);
        manifest.ciphertext_sha256 = Some(checksum);
        manifest.store(&manifest_path)?;

        info!(
            "archived {} files of set {} into {}",
            files.len(),
            set.name,
            artifact.display()
        );
        Ok(Some(ArchiveEntry {
            set: set.name.clone(),
            path: artifact,
            created: now,
            manifest: Some(manifest),
        }))
    }

    /// Move or encrypt the plaintext into `artifact`; returns its size and
    /// checksum.
    fn seal(
        &self,
        plaintext: &Path,
        artifact: &Path,
        key: Option<&CryptoKey>,
    ) -> Result<(u64, String)> {
        let bytes = self.read_bounded(plaintext)?;
        let stored = match key {
            Some(key) => key.encrypt(&bytes)?,
            None => bytes,
        };

        let mut staged = artifact.as_os_str().to_os_string();
        staged.push(PARTIAL_SUFFIX);
        let staged = PathBuf::from(staged);

        let written = write_private(&staged, &stored).and_then(|_| {
            fs::rename(&staged, artifact)?;
            Ok(())
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
        Ok((stored.len() as u64, sha256_hex(&stored)))
    }

    fn remove_partials(&self, dir: &Path) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(PARTIAL_SUFFIX) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => warn!("removed stale partial archive {}", entry.path().display()),
                    Err(e) => warn!("could not remove {}: {e}", entry.path().display()),
                }
            }
        }
    }

    /// Checksum against the manifest plus a full decrypt-and-read into a
    /// sink. Nothing decrypted touches the disk.
    pub fn verify(&self, archive: &Path) -> Result<Verification> {
        let manifest = ArchiveManifest::load(&manifest_path_for(archive))?;
        let mut result = Verification {
            archive: archive.to_path_buf(),
            manifest_complete: manifest.is_complete(),
            checksum_ok: false,
            opens: false,
        };
        if !result.manifest_complete {
            warn!("{} has an incomplete manifest", archive.display());
            return Ok(result);
        }

        let bytes = self.read_bounded(archive)?;
        result.checksum_ok = manifest.ciphertext_sha256.as_deref() == Some(sha256_hex(&bytes).as_str());
        if !result.checksum_ok {
            warn!("{} does not match its manifest checksum", archive.display());
        }

        result.opens = match self.open(&manifest, bytes) {
            Ok(plain) => match drain_tarball(&plain, manifest.compressed) {
                Ok(count) => {
                    debug!("{} opens with {count} entries", archive.display());
                    true
                }
                Err(e) => {
                    warn!("{} is not a readable tarball: {e}", archive.display());
                    false
                }
            },
            Err(e) => {
                warn!("{} cannot be opened: {e}", archive.display());
                false
            }
        };
        Ok(result)
    }

    fn open(&self, manifest: &ArchiveManifest, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if manifest.encrypted {
            self.keys.load_key()?.decrypt(&bytes)
        } else {
            Ok(bytes)
        }
    }

    /// Unpack `archive` into `dest`, which must be absent or empty. Files are
    /// staged beside `dest` and moved into place only when complete.
    pub fn restore(&self, archive: &Path, dest: &Path) -> Result<usize> {
        let manifest = ArchiveManifest::load(&manifest_path_for(archive))?;
        if !manifest.is_complete() {
            return Err(GuardError::InvalidManifest(format!(
                "{} was never completed",
                archive.display()
            )));
        }
        let bytes = self.read_bounded(archive)?;
        if manifest.ciphertext_sha256.as_deref() != Some(sha256_hex(&bytes).as_str()) {
            return Err(GuardError::Archive(format!(
                "{} does not match its manifest checksum",
                archive.display()
            )));
        }
        let plain = self.open(&manifest, bytes)?;

        if dest.exists() && fs::read_dir(dest)?.next().is_some() {
            return Err(GuardError::Archive(format!(
                "restore destination {} is not empty",
                dest.display()
            )));
        }
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".repo-guard-restore-")
            .tempdir_in(&parent)?;
        let count = unpack_tarball(&plain, manifest.compressed, staging.path())?;

        if dest.exists() {
            fs::remove_dir(dest)?;
        }
        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, dest) {
            let _ = fs::remove_dir_all(&staged);
            return Err(e.into());
        }
        info!("restored {count} files from {} into {}", archive.display(), dest.display());
        Ok(count)
    }

    /// Archives of every set, oldest first within each set.
    pub fn list(&self) -> Result<Vec<ArchiveEntry>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut sets: Vec<String> = fs::read_dir(&self.root)?
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        sets.sort();

        let mut entries = Vec::new();
        for set in sets {
            entries.extend(self.list_set(&set)?);
        }
        Ok(entries)
    }

    pub fn list_set(&self, set: &str) -> Result<Vec<ArchiveEntry>> {
        let dir = self.root.join(set);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let prefix = format!("{set}_");
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix)
                || name.ends_with(MANIFEST_SUFFIX)
                || name.ends_with(PARTIAL_SUFFIX)
                || name.ends_with(".tmp")
            {
                continue;
            }
            let path = entry.path();
            let manifest = ArchiveManifest::load(&manifest_path_for(&path)).ok();
            let created = manifest
                .as_ref()
                .map(|m| m.created_at)
                .or_else(|| stamp_from_name(&name[prefix.len()..]));
            let Some(created) = created else {
                debug!("ignoring unrecognised file {}", path.display());
                continue;
            };
            entries.push(ArchiveEntry {
                set: set.to_string(),
                path,
                created,
                manifest,
            });
        }
        entries.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }

    /// Apply the tiered policy to one set; returns the deleted archives.
    pub fn prune(&self, set: &str, policy: &TieredPolicy, now: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let entries = self.list_set(set)?;
        let created: Vec<DateTime<Utc>> = entries.iter().map(|e| e.created).collect();

        let mut removed = Vec::new();
        for idx in policy.prune(&created, now) {
            let entry = &entries[idx];
            fs::remove_file(&entry.path)?;
            let manifest = manifest_path_for(&entry.path);
            if manifest.exists() {
                fs::remove_file(&manifest)?;
            }
            debug!("pruned archive {}", entry.path.display());
            removed.push(entry.path.clone());
        }
        if !removed.is_empty() {
            info!("pruned {} archives of set {set}", removed.len());
        }
        Ok(removed)
    }
}

fn stamp_from_name(rest: &str) -> Option<DateTime<Utc>> {
    let stamp = rest.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|n| n.and_utc())
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = private_file(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn private_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

fn write_tarball(dest: &Path, files: &[PathBuf], compress: bool) -> Result<u64> {
    let file = private_file(dest)?;
    if compress {
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        append_files(&mut builder, files)?;
        builder.into_inner()?.finish()?.sync_all()?;
    } else {
        let mut builder = tar::Builder::new(file);
        append_files(&mut builder, files)?;
        builder.into_inner()?.sync_all()?;
    }
    Ok(fs::metadata(dest)?.len())
}

fn append_files<W: Write>(builder: &mut tar::Builder<W>, files: &[PathBuf]) -> Result<()> {
    for file in files {
        builder.append_path_with_name(file, entry_name(file))?;
    }
    Ok(())
}

fn tar_reader<'a>(bytes: &'a [u8], compressed: bool) -> tar::Archive<Box<dyn Read + 'a>> {
    let reader: Box<dyn Read + 'a> = if compressed {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    tar::Archive::new(reader)
}

fn drain_tarball(bytes: &[u8], compressed: bool) -> Result<usize> {
    let mut archive = tar_reader(bytes, compressed);
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        io::copy(&mut entry, &mut io::sink())?;
        count += 1;
    }
    Ok(count)
}

fn unpack_tarball(bytes: &[u8], compressed: bool, dest: &Path) -> Result<usize> {
    let mut archive = tar_reader(bytes, compressed);
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(dest)? {
            return Err(GuardError::Archive(format!(
                "refusing entry outside the destination: {}",
                entry.path()?.display()
            )));
        }
        count += 1;
    }
    Ok(count)
}
