use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Invalid detection pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No search roots configured")]
    NoSearchRoots,

    #[error("Not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("HEAD is detached in {}", .0.display())]
    DetachedHead(PathBuf),

    #[error("Command `{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("Command `{0}` timed out")]
    Timeout(String),

    #[error("Archive key not found: {}", .0.display())]
    KeyNotFound(PathBuf),

    #[error("Archive key already exists: {}", .0.display())]
    KeyExists(PathBuf),

    #[error("Invalid key format")]
    InvalidKeyFormat,

    #[error("Invalid archive manifest: {0}")]
    InvalidManifest(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Another `{0}` run holds the lock")]
    Locked(String),

    #[error("{0}")]
    Other(String),
}

/// How far a failure is allowed to propagate through a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Optional tool or manifest absent; skipped silently.
    NotApplicable,
    /// Operation completed in reduced form; logged as a warning.
    Degraded,
    /// Aborts the remaining stages of one repository.
    RepositoryFailure,
    /// Aborts one backup set.
    ArtifactFailure,
    /// Aborts the whole run.
    FatalConfiguration,
}

impl GuardError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GuardError::NoSearchRoots | GuardError::Config(_) => ErrorClass::FatalConfiguration,
            GuardError::Timeout(_) => ErrorClass::Degraded,
            GuardError::Crypto(_)
            | GuardError::KeyNotFound(_)
            | GuardError::KeyExists(_)
            | GuardError::InvalidKeyFormat
            | GuardError::InvalidManifest(_)
            | GuardError::Archive(_)
            | GuardError::Pattern(_) => ErrorClass::ArtifactFailure,
            _ => ErrorClass::RepositoryFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
