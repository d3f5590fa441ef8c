use anyhow::Result;
use chrono::Utc;
use repo_guard::quarantine::Quarantine;
use repo_guard::GuardConfig;
use std::path::Path;

/// Copy `file` into quarantine, optionally removing the original afterwards
pub fn quarantine(config: &GuardConfig, file: &Path, remove_original: bool) -> Result<()> {
    let quarantine = Quarantine::new(config.quarantine_dir());
    let copy = quarantine.isolate(file, Utc::now())?;
    println!("Quarantined copy: {}", copy.display());

    if remove_original {
        quarantine.remove_original(file, &copy)?;
        println!("Original removed: {}", file.display());
    } else {
        println!("Original left in place; rerun with --remove-original to delete it.");
    }
    Ok(())
}
