//! Child processes with a deadline.

use crate::error::{GuardError, Result};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit status and captured output of a finished child.
#[derive(Debug)]
pub struct Finished {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run `command` with stdin closed and both output streams captured, killing
/// it once `timeout` elapses. `label` names the command in errors.
///
/// Spawn failures are returned as [`GuardError::Io`] so callers can tell a
/// missing program apart from one that ran.
pub fn run_with_deadline(
    command: &mut Command,
    label: &str,
    timeout: Duration,
) -> Result<Finished> {
    debug!("running `{label}` with a {}s deadline", timeout.as_secs());
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes concurrently so a chatty child cannot block on a
    // full pipe while we poll.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    match wait_until(&mut child, Instant::now() + timeout)? {
        Some(status) => Ok(Finished {
            status,
            stdout: join(stdout),
            stderr: join(stderr),
        }),
        // Grandchildren may still hold the pipes open; leave the readers
        // detached rather than wait on them.
        None => Err(GuardError::Timeout(label.to_string())),
    }
}

/// `Ok(None)` when the deadline passed and the child was killed.
fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_captured() {
        let finished = run_with_deadline(
            Command::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]),
            "sh",
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(finished.status.code(), Some(3));
        assert_eq!(finished.stdout, b"out\n");
        assert_eq!(finished.stderr, b"err\n");
    }

    #[test]
    fn test_slow_child_is_killed_at_deadline() {
        let started = Instant::now();
        let err = run_with_deadline(
            Command::new("sh").args(["-c", "sleep 30"]),
            "sleep 30",
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::Timeout(ref label) if label == "sleep 30"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program_is_an_io_error() {
        let err = run_with_deadline(
            &mut Command::new("repo-guard-no-such-tool"),
            "repo-guard-no-such-tool",
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
