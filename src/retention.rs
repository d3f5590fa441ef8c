//! Retention decisions for backup branches and archives.
//!
//! Both policies are pure functions of the artifact list and an injected
//! `now`; they decide what to delete and never touch the file system or a
//! repository themselves.

use crate::error::{GuardError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;

/// Prefix of every branch created by the git operator.
pub const BACKUP_BRANCH_PREFIX: &str = "backup/";

/// Timestamp layout embedded in backup branch and archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A `backup/<timestamp>_<source>` branch. A second backup of the same
/// source within one second is named `backup/<timestamp>-<seq>_<source>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupBranch {
    pub name: String,
    pub created: NaiveDateTime,
    /// 1 for the unsuffixed name.
    pub seq: u32,
    pub source: String,
}

impl BackupBranch {
    /// Build the branch name for a backup of `source` taken at `at`.
    pub fn name_for(source: &str, at: DateTime<Utc>) -> String {
        Self::name_with_seq(source, at, 1)
    }

    /// Name for the `seq`-th backup of `source` within the same second.
    pub fn name_with_seq(source: &str, at: DateTime<Utc>, seq: u32) -> String {
        let stamp = at.format(TIMESTAMP_FORMAT);
        if seq <= 1 {
            format!("{BACKUP_BRANCH_PREFIX}{stamp}_{source}")
        } else {
            format!("{BACKUP_BRANCH_PREFIX}{stamp}-{seq}_{source}")
        }
    }

    /// Parse a local branch name. Returns `None` for anything that is not a
    /// well-formed backup branch; such branches are never pruned.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(BACKUP_BRANCH_PREFIX)?;
        // YYYYMMDD_HHMMSS is 15 bytes, followed by `_<source>` or
        // `-<seq>_<source>`.
        let stamp = rest.get(..15)?;
        let mut tail = rest.get(15..)?;
        let mut seq = 1;
        if let Some(suffixed) = tail.strip_prefix('-') {
            let digits = suffixed.find('_')?;
            seq = suffixed[..digits].parse().ok().filter(|n| *n > 1)?;
            tail = &suffixed[digits..];
        }
        let source = tail.strip_prefix('_')?;
        if source.is_empty() {
            return None;
        }
        let created = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            name: name.to_string(),
            created,
            seq,
            source: source.to_string(),
        })
    }
}

/// Names of the branches to delete so that only the `keep` most recent
/// (by embedded timestamp, not by name) remain. Oldest first.
pub fn prune_by_count(branches: &[BackupBranch], keep: usize) -> Vec<String> {
    let mut ordered: Vec<&BackupBranch> = branches.iter().collect();
    ordered.sort_by(|a, b| {
        b.created
            .cmp(&a.created)
            .then_with(|| b.seq.cmp(&a.seq))
            .then_with(|| b.name.cmp(&a.name))
    });

    let mut doomed: Vec<String> = ordered
        .into_iter()
        .skip(keep)
        .map(|b| b.name.clone())
        .collect();
    doomed.reverse();
    doomed
}

/// Age windows, in days, for archive retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredPolicy {
    /// Everything at most this old is kept.
    pub daily_days: i64,
    /// Up to this age, only artifacts whose age is a multiple of 7 days.
    pub weekly_days: i64,
    /// Up to this age, the newest artifact of each 30-day bucket.
    pub monthly_days: i64,
}

impl Default for TieredPolicy {
    fn default() -> Self {
        Self {
            daily_days: 7,
            weekly_days: 30,
            monthly_days: 90,
        }
    }
}

impl TieredPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.daily_days < 0
            || self.weekly_days < self.daily_days
            || self.monthly_days < self.weekly_days
        {
            return Err(GuardError::Config(format!(
                "retention windows must satisfy 0 <= daily ({}) <= weekly ({}) <= monthly ({})",
                self.daily_days, self.weekly_days, self.monthly_days
            )));
        }
        Ok(())
    }

    /// Indices into `created` of the artifacts to delete, ascending.
    pub fn prune(&self, created: &[DateTime<Utc>], now: DateTime<Utc>) -> Vec<usize> {
        let ages: Vec<i64> = created
            .iter()
            .map(|c| (now - *c).num_days().max(0))
            .collect();

        // Newest (smallest age) artifact per 30-day bucket inside the monthly window.
        let mut bucket_keepers: HashSet<usize> = HashSet::new();
        let mut monthly: Vec<usize> = (0..ages.len())
            .filter(|&i| ages[i] > self.weekly_days && ages[i] <= self.monthly_days)
            .collect();
        monthly.sort_by_key(|&i| (ages[i], Reverse(created[i])));
        let mut seen_buckets = HashSet::new();
        for i in monthly {
            if seen_buckets.insert(ages[i] / 30) {
                bucket_keepers.insert(i);
            }
        }

        (0..ages.len())
            .filter(|&i| {
                let age = ages[i];
                let keep = if age <= self.daily_days {
                    true
                } else if age <= self.weekly_days {
                    age % 7 == 0
                } else if age <= self.monthly_days {
                    bucket_keepers.contains(&i)
                } else {
                    false
                };
                !keep
            })
            .collect()
    }
}
