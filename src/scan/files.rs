//! File permission and placement heuristics.

use super::is_dependency_dir;
use crate::error::Result;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Extensions of plain text/data formats that should never be executable.
const DATA_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "yaml", "yml", "toml", "csv", "xml", "ini", "cfg", "conf", "env",
    "properties", "html", "css", "svg", "lock",
];

/// Key, certificate and keystore formats.
const CREDENTIAL_EXTENSIONS: &[&str] = &[
    "pem", "key", "p12", "pfx", "jks", "keystore", "ppk", "crt", "cer", "der", "asc", "gpg",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileIssue {
    WorldWritable,
    ExecutableData,
    HiddenCredential,
    Oversized,
}

impl fmt::Display for FileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WorldWritable => "world-writable",
            Self::ExecutableData => "executable data file",
            Self::HiddenCredential => "hidden credential file",
            Self::Oversized => "oversized file",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFinding {
    pub issue: FileIssue,
    /// Relative to the audited root.
    pub path: PathBuf,
}

pub struct FileAuditor {
    large_file_bytes: u64,
}

impl FileAuditor {
    pub fn new(large_file_bytes: u64) -> Self {
        Self { large_file_bytes }
    }

    /// Walk `root` (skipping `.git` and dependency caches) and collect every
    /// finding. Each check is independent; one file may produce several.
    pub fn audit(&self, root: &Path) -> Result<Vec<FileFinding>> {
        let mut findings = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata().map_err(std::io::Error::from)?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let name = entry.file_name().to_string_lossy();
            let ext = extension(entry.path());

            let mode = file_mode(&meta);
            if mode & 0o002 != 0 {
                findings.push(FileFinding {
                    issue: FileIssue::WorldWritable,
                    path: rel.clone(),
                });
            }
            if mode & 0o111 != 0 && DATA_EXTENSIONS.contains(&ext.as_str()) {
                findings.push(FileFinding {
                    issue: FileIssue::ExecutableData,
                    path: rel.clone(),
                });
            }
            if name.starts_with('.') && CREDENTIAL_EXTENSIONS.contains(&ext.as_str()) {
                findings.push(FileFinding {
                    issue: FileIssue::HiddenCredential,
                    path: rel.clone(),
                });
            }
            if meta.len() > self.large_file_bytes {
                findings.push(FileFinding {
                    issue: FileIssue::Oversized,
                    path: rel,
                });
            }
        }
        Ok(findings)
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && (entry.file_name() == OsStr::new(".git") || is_dependency_dir(entry.file_name()))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn issues(findings: &[FileFinding], path: &str) -> Vec<FileIssue> {
        findings
            .iter()
            .filter(|f| f.path == Path::new(path))
            .map(|f| f.issue)
            .collect()
    }

    /// Write with 0644 regardless of the umask.
    fn write(path: &Path, contents: impl AsRef<[u8]>) {
        fs::write(path, contents).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o644)).unwrap();
        }
    }

    #[test]
    fn test_clean_tree_has_no_findings() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("README.md"), "hello");
        fs::create_dir(temp.path().join("src")).unwrap();
        write(&temp.path().join("src/lib.rs"), "pub fn f() {}");

        let findings = FileAuditor::new(1024).audit(temp.path()).unwrap();
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn test_hidden_credential_and_oversized() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join(".deploy.pem"), "cert");
        write(&temp.path().join("deploy.pem"), "cert");
        write(&temp.path().join("dump.sql"), vec![b'x'; 2048]);

        let findings = FileAuditor::new(1024).audit(temp.path()).unwrap();
        assert!(issues(&findings, ".deploy.pem").contains(&FileIssue::HiddenCredential));
        assert!(issues(&findings, "deploy.pem").is_empty());
        assert_eq!(issues(&findings, "dump.sql"), vec![FileIssue::Oversized]);
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_checks() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let open = temp.path().join("shared.txt");
        let exec = temp.path().join("settings.json");
        let script = temp.path().join("run.sh");
        for p in [&open, &exec, &script] {
            fs::write(p, "x").unwrap();
        }
        fs::set_permissions(&open, fs::Permissions::from_mode(0o646)).unwrap();
        fs::set_permissions(&exec, fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let findings = FileAuditor::new(1 << 20).audit(temp.path()).unwrap();
        assert_eq!(issues(&findings, "shared.txt"), vec![FileIssue::WorldWritable]);
        assert_eq!(issues(&findings, "settings.json"), vec![FileIssue::ExecutableData]);
        assert!(issues(&findings, "run.sh").is_empty());
    }

    #[test]
    fn test_git_and_dependency_dirs_skipped() {
        let temp = TempDir::new().unwrap();
        for dir in [".git", "node_modules/pkg"] {
            fs::create_dir_all(temp.path().join(dir)).unwrap();
            write(&temp.path().join(dir).join("big.bin"), vec![0u8; 4096]);
        }
        let findings = FileAuditor::new(1024).audit(temp.path()).unwrap();
        assert!(findings.is_empty());
    }
}
