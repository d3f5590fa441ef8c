//! # Secrets Scanner
//!
//! Applies an ordered pattern set to the tracked files of a working tree and
//! to the lines added by the most recent commits.
//!
//! Keyword patterns (`password = ...`, `api_key: ...`) match
//! case-insensitively. Fixed-prefix token patterns (`ghp_`, `AKIA`, `xoxb-`)
//! are case-sensitive and describe a shape (prefix + length + alphabet)
//! rather than a literal value.
//!
//! A match in history is reported as historical even when the working tree
//! no longer contains it: the secret is still reachable from the object
//! database and any clone of it.
//!
//! Matched text is kept only in memory. [`SecretFinding`]'s `Debug` output
//! omits it and nothing in this module passes it to `tracing`.

use super::{is_excluded, is_probably_binary};
use crate::config::PatternConfig;
use crate::error::Result;
use crate::git::GitRepo;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretCategory {
    ApiKey,
    CloudCredential,
    PlatformToken,
    PrivateKey,
    DatabaseUrl,
    GenericAssignment,
    EnvSecret,
}

impl fmt::Display for SecretCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ApiKey => "api key",
            Self::CloudCredential => "cloud credential",
            Self::PlatformToken => "platform token",
            Self::PrivateKey => "private key",
            Self::DatabaseUrl => "database url",
            Self::GenericAssignment => "credential assignment",
            Self::EnvSecret => "env secret",
        };
        f.write_str(label)
    }
}

/// (name, category, regex, case-insensitive)
const BUILTIN_PATTERNS: &[(&str, SecretCategory, &str, bool)] = &[
    (
        "aws-access-key-id",
        SecretCategory::CloudCredential,
        r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
        false,
    ),
    (
        "aws-secret-access-key",
        SecretCategory::CloudCredential,
        r#"aws_?secret_?access_?key\s*[:=]\s*["']?[A-Za-z0-9/+=]{40}"#,
        true,
    ),
    (
        "github-token",
        SecretCategory::PlatformToken,
        r"\bgh[pousr]_[A-Za-z0-9]{36}\b",
        false,
    ),
    (
        "github-fine-grained-token",
        SecretCategory::PlatformToken,
        r"\bgithub_pat_[A-Za-z0-9_]{82}\b",
        false,
    ),
    (
        "gitlab-token",
        SecretCategory::PlatformToken,
        r"\bglpat-[A-Za-z0-9_\-]{20}\b",
        false,
    ),
    (
        "slack-token",
        SecretCategory::PlatformToken,
        r"\bxox[abprs]-[A-Za-z0-9-]{10,}",
        false,
    ),
    (
        "stripe-secret-key",
        SecretCategory::ApiKey,
        r"\b[sr]k_live_[A-Za-z0-9]{24,}\b",
        false,
    ),
    (
        "google-api-key",
        SecretCategory::ApiKey,
        r"\bAIza[0-9A-Za-z_\-]{35}\b",
        false,
    ),
    (
        "generic-api-key",
        SecretCategory::ApiKey,
        r#"api[_-]?key\s*[:=]\s*["']?[A-Za-z0-9_\-]{16,}"#,
        true,
    ),
    (
        "private-key-block",
        SecretCategory::PrivateKey,
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED |PGP )?PRIVATE KEY(?: BLOCK)?-----",
        false,
    ),
    (
        "database-url",
        SecretCategory::DatabaseUrl,
        r"\b(?:postgres(?:ql)?|mysql|mariadb|mongodb(?:\+srv)?|redis|amqp)://[^\s:/@]+:[^\s@/]+@",
        true,
    ),
    (
        "credential-assignment",
        SecretCategory::GenericAssignment,
        r#"\b(?:password|passwd|pwd|secret|token)\s*[:=]\s*["'][^"'\s]{8,}["']"#,
        true,
    ),
    (
        "env-secret",
        SecretCategory::EnvSecret,
        r"^\s*(?:export\s+)?[A-Z0-9_]*(?:SECRET|TOKEN|PASSWORD|PASSWD|API_KEY|PRIVATE_KEY)[A-Z0-9_]*\s*=\s*\S{8,}",
        false,
    ),
];

#[derive(Debug, Clone)]
pub struct SecretPattern {
    pub name: String,
    pub category: SecretCategory,
    regex: Regex,
}

impl SecretPattern {
    pub fn new(
        name: impl Into<String>,
        category: SecretCategory,
        pattern: &str,
        case_insensitive: bool,
    ) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            name: name.into(),
            category,
            regex,
        })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

/// An ordered list of detection patterns.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<SecretPattern>,
}

impl PatternSet {
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn builtin() -> Result<Self> {
        let patterns = BUILTIN_PATTERNS
            .iter()
            .map(|(name, category, regex, ci)| SecretPattern::new(*name, *category, regex, *ci))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Built-in patterns followed by the configured ones.
    pub fn with_extra(extra: &[PatternConfig]) -> Result<Self> {
        let mut set = Self::builtin()?;
        for p in extra {
            set.push(SecretPattern::new(
                p.name.clone(),
                p.category,
                &p.regex,
                p.case_insensitive,
            )?);
        }
        Ok(set)
    }

    pub fn push(&mut self, pattern: SecretPattern) {
        self.patterns.push(pattern);
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `(line number, pattern, line)` for every pattern matching a line.
    fn matches<'a, 't>(&'a self, text: &'t str) -> Vec<(usize, &'a SecretPattern, &'t str)> {
        let mut hits = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            for pattern in &self.patterns {
                if pattern.is_match(line) {
                    hits.push((idx + 1, pattern, line));
                }
            }
        }
        hits
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingLocation {
    WorkingTree { path: PathBuf, line: usize },
    /// Line added by a commit within the scanned history depth.
    History { commit: String },
}

#[derive(Clone)]
pub struct SecretFinding {
    pub repository: String,
    pub pattern: String,
    pub category: SecretCategory,
    pub location: FindingLocation,
    context: String,
}

impl SecretFinding {
    pub fn is_historical(&self) -> bool {
        matches!(self.location, FindingLocation::History { .. })
    }

    /// The matched line. Never log this.
    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Debug for SecretFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretFinding")
            .field("repository", &self.repository)
            .field("pattern", &self.pattern)
            .field("category", &self.category)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

pub struct SecretsScanner<'a> {
    patterns: &'a PatternSet,
    history_depth: usize,
    max_file_bytes: u64,
}

impl<'a> SecretsScanner<'a> {
    pub fn new(patterns: &'a PatternSet, history_depth: usize, max_file_bytes: u64) -> Self {
        Self {
            patterns,
            history_depth,
            max_file_bytes,
        }
    }

    pub fn scan(&self, repo: &GitRepo) -> Result<Vec<SecretFinding>> {
        let mut findings = self.scan_working_tree(repo)?;
        findings.extend(self.scan_history(repo)?);
        Ok(findings)
    }

    pub fn scan_working_tree(&self, repo: &GitRepo) -> Result<Vec<SecretFinding>> {
        let name = repo.name();
        let mut findings = Vec::new();

        for rel in repo.tracked_files()? {
            if is_excluded(&rel) {
                continue;
            }
            let path = repo.workdir().join(&rel);
            let Ok(meta) = fs::symlink_metadata(&path) else {
                continue;
            };
            if !meta.is_file() || meta.len() > self.max_file_bytes {
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("cannot read {}: {e}", path.display());
                    continue;
                }
            };
            if is_probably_binary(&bytes) {
                continue;
            }

            let text = String::from_utf8_lossy(&bytes);
            for (line, pattern, context) in self.patterns.matches(&text) {
                findings.push(SecretFinding {
                    repository: name.clone(),
                    pattern: pattern.name.clone(),
                    category: pattern.category,
                    location: FindingLocation::WorkingTree {
                        path: rel.clone(),
                        line,
                    },
                    context: context.to_string(),
                });
            }
        }
        Ok(findings)
    }

    pub fn scan_history(&self, repo: &GitRepo) -> Result<Vec<SecretFinding>> {
        let name = repo.name();
        let mut findings = Vec::new();
        for patch in repo.recent_patches(self.history_depth)? {
            for (_, pattern, context) in self.patterns.matches(&patch.added) {
                findings.push(SecretFinding {
                    repository: name.clone(),
                    pattern: pattern.name.clone(),
                    category: pattern.category,
                    location: FindingLocation::History {
                        commit: patch.commit.clone(),
                    },
                    context: context.to_string(),
                });
            }
        }
        Ok(findings)
    }
}

/// Finding counts per category; the only form in which findings are retained.
pub fn summarize(findings: &[SecretFinding]) -> BTreeMap<SecretCategory, usize> {
    let mut counts = BTreeMap::new();
    for finding in findings {
        *counts.entry(finding.category).or_insert(0) += 1;
    }
    counts
}
