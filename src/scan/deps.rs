//! Delegates to ecosystem vulnerability tools when their manifests exist.
//!
//! A missing manifest, lockfile or tool is "not applicable". A tool that
//! outlives its deadline or produces output we cannot interpret counts as a
//! failure.

use crate::error::{GuardError, Result};
use crate::process::{run_with_deadline, Finished};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// `npm audit` needs a lockfile to resolve the dependency tree.
const NPM_LOCKFILES: &[&str] = &["package-lock.json", "npm-shrinkwrap.json"];

/// Python packages with known-vulnerable releases: (package, first fixed
/// version, advisory).
const PYTHON_ADVISORIES: &[(&str, &str, &str)] = &[
    ("django", "3.2.25", "CVE-2024-24680"),
    ("flask", "2.2.5", "CVE-2023-30861"),
    ("requests", "2.31.0", "CVE-2023-32681"),
    ("urllib3", "1.26.18", "CVE-2023-45803"),
    ("pyyaml", "5.4", "CVE-2020-14343"),
    ("jinja2", "3.1.3", "CVE-2024-22195"),
    ("pillow", "10.0.1", "CVE-2023-4863"),
    ("cryptography", "41.0.5", "CVE-2023-49083"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub ecosystem: &'static str,
    pub package: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    NotApplicable,
    /// At least one ecosystem was audited; empty means clean.
    Audited(Vec<Advisory>),
}

#[derive(Debug)]
pub struct DependencyAuditor {
    /// Upper bound for each external audit tool.
    timeout: Duration,
}

impl DependencyAuditor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn audit(&self, root: &Path) -> Result<DependencyStatus> {
        let mut audited = false;
        let mut advisories = Vec::new();

        for check in [audit_npm, audit_python, audit_ruby] {
            if let Some(found) = check(root, self.timeout)? {
                audited = true;
                advisories.extend(found);
            }
        }

        Ok(if audited {
            DependencyStatus::Audited(advisories)
        } else {
            DependencyStatus::NotApplicable
        })
    }
}

/// Run an external tool in `dir`, killing it after `timeout`. `Ok(None)`
/// when it is not installed.
fn run_tool(
    program: &str,
    args: &[&str],
    dir: &Path,
    timeout: Duration,
) -> Result<Option<Finished>> {
    let label = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    match run_with_deadline(Command::new(program).args(args).current_dir(dir), &label, timeout) {
        Ok(finished) => Ok(Some(finished)),
        Err(GuardError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            debug!("{program} not installed; skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[derive(Deserialize)]
struct NpmAudit {
    metadata: NpmMetadata,
}

#[derive(Deserialize)]
struct NpmMetadata {
    vulnerabilities: NpmCounts,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct NpmCounts {
    info: usize,
    low: usize,
    moderate: usize,
    high: usize,
    critical: usize,
}

fn audit_npm(root: &Path, timeout: Duration) -> Result<Option<Vec<Advisory>>> {
    if !root.join("package.json").is_file() {
        return Ok(None);
    }
    if !NPM_LOCKFILES.iter().any(|lock| root.join(lock).is_file()) {
        debug!("{} has no npm lockfile; skipping npm audit", root.display());
        return Ok(None);
    }
    let Some(output) = run_tool("npm", &["audit", "--json"], root, timeout)? else {
        return Ok(None);
    };
    // npm exits non-zero when it finds vulnerabilities; only the JSON matters.
    let report: NpmAudit =
        serde_json::from_slice(&output.stdout).map_err(|e| GuardError::Command {
            command: "npm audit --json".into(),
            detail: e.to_string(),
        })?;
    Ok(Some(npm_advisories(&report.metadata.vulnerabilities)))
}

fn npm_advisories(counts: &NpmCounts) -> Vec<Advisory> {
    [
        ("critical", counts.critical),
        ("high", counts.high),
        ("moderate", counts.moderate),
        ("low", counts.low),
        ("info", counts.info),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(severity, n)| Advisory {
        ecosystem: "npm",
        package: "package.json".into(),
        detail: format!("{n} {severity} vulnerabilities"),
    })
    .collect()
}

fn audit_python(root: &Path, _timeout: Duration) -> Result<Option<Vec<Advisory>>> {
    let manifest = root.join("requirements.txt");
    if !manifest.is_file() {
        return Ok(None);
    }
    Ok(Some(python_advisories(&fs::read_to_string(manifest)?)))
}

fn python_advisories(requirements: &str) -> Vec<Advisory> {
    let mut found = Vec::new();
    for line in requirements.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let line = line.split(';').next().unwrap_or_default().trim();
        let Some((name, version)) = line.split_once("==") else {
            continue;
        };
        let name = name
            .split('[')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .replace('_', "-");
        let version = version.trim();

        for (package, fixed, advisory) in PYTHON_ADVISORIES {
            if name == *package && compare_versions(version, fixed) == Ordering::Less {
                found.push(Advisory {
                    ecosystem: "pip",
                    package: format!("{name}=={version}"),
                    detail: format!("{advisory}, fixed in {fixed}"),
                });
            }
        }
    }
    found
}

/// Numeric dotted comparison; non-numeric suffixes are ignored per segment.
fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(v: &str) -> Vec<u64> {
        v.split('.')
            .map(|p| {
                p.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    }
    let (a, b) = (parts(a), parts(b));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn audit_ruby(root: &Path, timeout: Duration) -> Result<Option<Vec<Advisory>>> {
    if !root.join("Gemfile.lock").is_file() {
        return Ok(None);
    }
    let Some(output) = run_tool("bundle-audit", &["check"], root, timeout)? else {
        return Ok(None);
    };
    if output.status.success() {
        return Ok(Some(Vec::new()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let gems: Vec<String> = stdout
        .lines()
        .filter_map(|l| l.strip_prefix("Name:"))
        .map(|n| n.trim().to_string())
        .collect();
    let advisories = if gems.is_empty() {
        vec![Advisory {
            ecosystem: "bundler",
            package: "Gemfile.lock".into(),
            detail: "bundle-audit reported vulnerabilities".into(),
        }]
    } else {
        gems.into_iter()
            .map(|package| Advisory {
                ecosystem: "bundler",
                package,
                detail: "known vulnerability".into(),
            })
            .collect()
    };
    Ok(Some(advisories))
}
