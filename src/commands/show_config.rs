use anyhow::Result;
use repo_guard::GuardConfig;

/// Print the effective configuration as TOML
pub fn show_config(config: &GuardConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
