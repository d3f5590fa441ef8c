pub mod archive;
pub mod backup;
pub mod key;
pub mod quarantine;
pub mod scan;
pub mod show_config;
pub mod status;

pub use archive::{archive_create, archive_list, archive_prune, archive_restore, archive_verify};
pub use backup::backup;
pub use key::{export_key, import_key};
pub use quarantine::quarantine;
pub use scan::scan;
pub use show_config::show_config;
pub use status::status;

use chrono::{DateTime, Utc};
use repo_guard::{report, GuardError};
use std::path::Path;
use tracing::{info, warn};

/// `Ok(None)` when another run of the same kind holds the lock.
fn skip_if_locked<T>(result: repo_guard::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GuardError::Locked(name)) => {
            info!("another {name} run is in progress; skipping");
            println!("Another {name} run is in progress; skipping.");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Print a summary and keep a copy under the reports directory.
fn publish(dir: &Path, kind: &str, at: DateTime<Utc>, summary: &str) {
    print!("{summary}");
    match report::write_report(dir, kind, at, summary) {
        Ok(path) => println!("\nReport written to {}", path.display()),
        Err(e) => warn!("could not write {kind} report: {e}"),
    }
}
