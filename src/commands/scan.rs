use super::{publish, skip_if_locked};
use anyhow::Result;
use chrono::Utc;
use repo_guard::{report, Engine, GuardConfig};

/// Run every security check and write the security summary
pub fn scan(config: GuardConfig) -> Result<()> {
    let now = Utc::now();
    let engine = Engine::new(config);
    engine.register_signals()?;

    let Some(run) = skip_if_locked(engine.scan(now))? else {
        return Ok(());
    };

    let summary = report::security_summary(&run);
    publish(&engine.config().reports_dir(), "security", now, &summary);
    Ok(())
}
