//! # repo-guard
//!
//! Unattended protection for the git repositories on a developer machine.
//!
//! ## Features
//!
//! - **Defensive backups**: dirty work on allow-listed branches is committed,
//!   copied to a timestamped `backup/*` branch and pushed when possible
//! - **Retention**: old backup branches and archives are pruned by count or by
//!   daily/weekly/monthly tiers
//! - **Security scanning**: leaked secrets (working tree and recent history),
//!   unsafe file permissions, vulnerable dependencies, checksum drift
//! - **Encrypted archives**: AES-256-GCM sealed tarballs of paths that live
//!   outside repositories, such as `~/.ssh` or dotfiles
//!
//! ## Quick Start
//!
//! ```bash
//! # ~/.config/repo-guard/config.toml
//! search_roots = ["~/src"]
//!
//! [[backup_sets]]
//! name = "ssh"
//! paths = ["~/.ssh"]
//! exclude = ["known_hosts*"]
//! ```
//!
//! ```bash
//! repo-guard backup          # commit / branch / push / prune
//! repo-guard scan            # security summary
//! repo-guard archive create  # seal every backup set
//! repo-guard key export ~/safe/archive.key
//! ```
//!
//! ## How It Works
//!
//! ```text
//! locator ──► snapshot ──► operator ──► retention (branches)
//!        └──► scan::{secrets, files, deps, integrity}
//! backup sets ──► archive ──► retention (tiers)
//! ```
//!
//! Every run writes a human-readable report under `<state dir>/reports` and
//! appends to `<state dir>/logs/repo-guard.log`. Failures are contained to
//! the repository or backup set they occur in.
//!
//! ## Module Overview
//!
//! - [`locator`] - Finds working trees under the search roots
//! - [`snapshot`] - Point-in-time repository state and status records
//! - [`operator`] - Commit, backup branch, push and prune
//! - [`retention`] - Count-based and tiered pruning decisions
//! - [`scan`] - Secrets, file security, dependency and integrity checks
//! - [`archive`] - Encrypted archive creation, verification and restore
//! - [`crypto`] / [`key`] - Archive encryption and key storage
//! - [`engine`] - Batch runs, locking and cancellation
//! - [`process`] - External tools run under a deadline
//! - [`report`] - Run summaries
//! - [`error`] - Error types and the failure taxonomy

pub mod archive;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod git;
pub mod key;
pub mod locator;
pub mod lock;
pub mod logging;
pub mod operator;
pub mod process;
pub mod quarantine;
pub mod report;
pub mod retention;
pub mod scan;
pub mod snapshot;

pub use config::GuardConfig;
pub use engine::Engine;
pub use error::{GuardError, Result};
