//! Subprocess execution with timeout support.
//!
//! External commands (`ps`, `vm_stat`, the reclaim command) can block
//! indefinitely. Helper threads drain the output pipes while the caller polls
//! the child against a deadline. On expiry the child is killed and reaped
//! before returning, so a timed-out command never outlives the call.

use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// How often a running child is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of a subprocess execution with timeout.
#[derive(Debug)]
pub enum SubprocessResult {
    /// Command completed successfully with output.
    Success(Output),
    /// Command timed out.
    Timeout,
    /// Command failed to spawn.
    SpawnError(String),
    /// Command exited with non-zero status.
    Failed(Output),
}

impl SubprocessResult {
    /// Returns stdout as string if the command ran to completion.
    #[must_use]
    pub fn stdout_string(&self) -> Option<String> {
        match self {
            Self::Success(output) | Self::Failed(output) => {
                Some(String::from_utf8_lossy(&output.stdout).to_string())
            }
            _ => None,
        }
    }

    /// Returns true if command completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if command timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// One-line description of a non-success outcome.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::Timeout => Some("timeout".to_string()),
            Self::SpawnError(msg) => Some(format!("spawn failed: {msg}")),
            Self::Failed(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
                Some(format!("{}: {}", output.status, last.trim()))
            }
        }
    }
}

/// Runs `program` with `args`, waiting at most `timeout`.
pub fn run_with_timeout<S: AsRef<str>>(program: &str, args: &[S], timeout: Duration) -> SubprocessResult {
    let child = Command::new(program)
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => return SubprocessResult::SpawnError(e.to_string()),
    };
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    // No deadline when `timeout` is too large to add to now.
    let deadline = Instant::now().checked_add(timeout);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                let now = Instant::now();
                match deadline {
                    Some(deadline) if now >= deadline => {
                        debug!(program, pid = child.id(), ?timeout, "subprocess timed out");
                        kill_and_reap(&mut child);
                        return SubprocessResult::Timeout;
                    }
                    Some(deadline) => thread::sleep(POLL_INTERVAL.min(deadline - now)),
                    None => thread::sleep(POLL_INTERVAL),
                }
            }
            Err(e) => {
                kill_and_reap(&mut child);
                return SubprocessResult::SpawnError(e.to_string());
            }
        }
    };

    let output = Output { status, stdout: collect(stdout), stderr: collect(stderr) };
    if output.status.success() {
        SubprocessResult::Success(output)
    } else {
        SubprocessResult::Failed(output)
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

/// Kills the child and waits for it. The pipe readers are left to finish
/// on their own, since a grandchild may still hold the pipes open.
fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(pid = child.id(), error = %e, "kill failed");
    }
    let _ = child.wait();
}

/// Runs a command with timeout and returns stdout on success.
#[must_use]
pub fn run_with_timeout_stdout(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    match run_with_timeout(program, args, timeout) {
        SubprocessResult::Success(output) => {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        }
        _ => None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_successful_command() {
        let result = run_with_timeout("echo", &["hello"], Duration::from_secs(1));
        assert!(result.is_success());
        assert_eq!(result.stdout_string().unwrap().trim(), "hello");
        assert!(result.failure_message().is_none());
    }

    #[test]
    fn test_timeout_returns_quickly() {
        let start = Instant::now();
        let result = run_with_timeout("sleep", &["10"], Duration::from_millis(100));

        assert!(result.is_timeout());
        assert_eq!(result.failure_message().as_deref(), Some("timeout"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_timed_out_child_is_gone_on_return() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 1; touch {}", marker.display());

        let result = run_with_timeout("sh", &["-c", script.as_str()], Duration::from_millis(100));
        assert!(result.is_timeout());

        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists());
    }

    #[test]
    fn test_large_output_does_not_block() {
        let result = run_with_timeout("sh", &["-c", "head -c 200000 /dev/zero"], Duration::from_secs(5));
        assert!(result.is_success());
        assert_eq!(result.stdout_string().unwrap().len(), 200_000);
    }

    #[test]
    fn test_nonexistent_command() {
        let result = run_with_timeout::<&str>("this_command_does_not_exist_12345", &[], Duration::from_secs(1));
        assert!(matches!(result, SubprocessResult::SpawnError(_)));
    }

    #[test]
    fn test_failed_command_reports_stderr() {
        let result = run_with_timeout("sh", &["-c", "echo boom >&2; exit 3"], Duration::from_secs(2));
        assert!(matches!(result, SubprocessResult::Failed(_)));
        let msg = result.failure_message().unwrap();
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn test_owned_string_args() {
        let args = vec!["-c".to_string(), "printf ok".to_string()];
        let result = run_with_timeout("sh", &args, Duration::from_secs(2));
        assert_eq!(result.stdout_string().as_deref(), Some("ok"));
    }

    #[test]
    fn test_stdout_convenience_none_on_timeout() {
        assert!(run_with_timeout_stdout("sleep", &["10"], Duration::from_millis(50)).is_none());
        assert_eq!(
            run_with_timeout_stdout("echo", &["test"], Duration::from_secs(1)).unwrap().trim(),
            "test"
        );
    }
}
