use super::{publish, skip_if_locked};
use anyhow::Result;
use chrono::Utc;
use repo_guard::{report, Engine, GuardConfig};

/// Run the defensive git sequence over every repository
pub fn backup(config: GuardConfig, force: bool) -> Result<()> {
    let now = Utc::now();
    let engine = Engine::new(config);
    engine.register_signals()?;

    let Some(run) = skip_if_locked(engine.backup(force, now))? else {
        return Ok(());
    };

    let summary = report::backup_summary(&run, engine.config().inactivity_days);
    publish(&engine.config().reports_dir(), "backup", now, &summary);
    Ok(())
}
