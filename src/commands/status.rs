use anyhow::Result;
use chrono::Utc;
use repo_guard::{report, Engine, GuardConfig};

/// Print repository state without touching any repository
pub fn status(config: GuardConfig) -> Result<()> {
    let engine = Engine::new(config);
    let run = engine.status(Utc::now())?;
    print!("{}", report::backup_summary(&run, engine.config().inactivity_days));
    println!(
        "\nStatus records written to {}",
        engine.config().status_dir().display()
    );
    Ok(())
}
