use super::{publish, skip_if_locked};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use repo_guard::archive::ArchiveManager;
use repo_guard::{report, Engine, GuardConfig};
use std::path::{Path, PathBuf};

/// Create archives for the named sets (all when empty) and prune old ones
pub fn archive_create(config: GuardConfig, sets: &[String]) -> Result<()> {
    if config.backup_sets.is_empty() {
        println!("No backup sets configured.");
        return Ok(());
    }

    let now = Utc::now();
    let engine = Engine::new(config);
    engine.register_signals()?;

    let Some(run) = skip_if_locked(engine.archive(sets, now))? else {
        return Ok(());
    };

    let summary = report::archive_summary(&run);
    publish(&engine.config().reports_dir(), "archive", now, &summary);

    let failed = run.sets.iter().filter(|s| s.created.is_err()).count();
    if failed > 0 {
        bail!("{failed} backup set(s) failed");
    }
    Ok(())
}

/// Verify the given archives, or every stored archive
pub fn archive_verify(config: &GuardConfig, archives: &[PathBuf]) -> Result<()> {
    let manager = ArchiveManager::from_config(config);
    let targets: Vec<PathBuf> = if archives.is_empty() {
        manager.list()?.into_iter().map(|e| e.path).collect()
    } else {
        archives.to_vec()
    };
    if targets.is_empty() {
        println!("No archives found in {}", manager.root().display());
        return Ok(());
    }

    let mut failed = 0;
    for archive in &targets {
        match manager.verify(archive) {
            Ok(v) if v.is_verified() => println!("OK      {}", archive.display()),
            Ok(v) => {
                failed += 1;
                let reason = if !v.manifest_complete {
                    "incomplete manifest"
                } else if !v.checksum_ok {
                    "checksum mismatch"
                } else {
                    "cannot be opened"
                };
                println!("FAILED  {} ({reason})", archive.display());
            }
            Err(e) => {
                failed += 1;
                println!("FAILED  {} ({e})", archive.display());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} archives failed verification", targets.len());
    }
    Ok(())
}

/// List stored archives
pub fn archive_list(config: &GuardConfig) -> Result<()> {
    let manager = ArchiveManager::from_config(config);
    let entries = manager.list()?;
    if entries.is_empty() {
        println!("No archives found in {}", manager.root().display());
        return Ok(());
    }

    for entry in entries {
        let size = entry
            .manifest
            .as_ref()
            .and_then(|m| m.ciphertext_size)
            .map(|s| format!("{s} bytes"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {}  {:>14}  {:<7}  {}",
            entry.set,
            entry.created.format("%Y-%m-%d %H:%M:%S"),
            size,
            if entry.is_valid() { "valid" } else { "INVALID" },
            entry.path.display()
        );
    }
    Ok(())
}

/// Restore an archive into `dest`
pub fn archive_restore(config: &GuardConfig, archive: &Path, dest: &Path) -> Result<()> {
    println!("Restoring {} into {}", archive.display(), dest.display());
    let count = ArchiveManager::from_config(config)
        .restore(archive, dest)
        .with_context(|| format!("restoring {}", archive.display()))?;
    println!("Restored {count} files.");
    Ok(())
}

/// Apply the retention tiers to every configured backup set
pub fn archive_prune(config: GuardConfig) -> Result<()> {
    let engine = Engine::new(config);
    engine.register_signals()?;

    let Some(outcomes) = skip_if_locked(engine.prune_archives(Utc::now()))? else {
        return Ok(());
    };

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.removed {
            Ok(removed) => println!("{:<16} pruned {}", outcome.set, removed.len()),
            Err(e) => {
                failed += 1;
                println!("{:<16} FAILED ({e})", outcome.set);
            }
        }
    }
    if failed > 0 {
        bail!("pruning failed for {failed} backup set(s)");
    }
    Ok(())
}
