//! Event log setup: compact lines on stderr plus an append-only plain-text
//! file under the state directory.

use crate::error::{GuardError, Result};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE: &str = "repo-guard.log";

/// Install the global subscriber. `RUST_LOG` overrides the level; otherwise
/// `info`, or `debug` when `verbose`. Without `log_dir`, or when the log
/// file cannot be opened, only stderr is used.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let mut file_error = None;
    let file_layer = log_dir.and_then(|dir| {
        let opened = fs::create_dir_all(dir).and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))
        });
        match opened {
            Ok(file) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                file_error = Some(format!("{}: {e}", dir.display()));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| GuardError::Other(format!("logging already initialised: {e}")))?;

    if let Some(e) = file_error {
        tracing::warn!("event log unavailable, logging to stderr only ({e})");
    }
    Ok(())
}
