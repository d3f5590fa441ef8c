use anyhow::{Context, Result};
use repo_guard::key::KeyManager;
use repo_guard::GuardConfig;
use std::path::Path;

/// Export the archive key to a file
pub fn export_key(config: &GuardConfig, output_path: &Path) -> Result<()> {
    println!("Exporting key to: {}", output_path.display());

    let key_manager = KeyManager::new(config.key_file());
    key_manager
        .export_key(output_path)
        .with_context(|| format!("exporting {}", key_manager.key_path().display()))?;

    println!("Key exported successfully!");
    println!("\nWARNING: Keep this key file secure!");
    println!("Anyone with this key can decrypt your archives.");

    Ok(())
}

/// Import an archive key from a file
pub fn import_key(config: &GuardConfig, input_path: &Path) -> Result<()> {
    println!("Importing key from: {}", input_path.display());

    let key_manager = KeyManager::new(config.key_file());
    key_manager.import_key(input_path)?;

    println!("Key imported to {}", key_manager.key_path().display());

    Ok(())
}
