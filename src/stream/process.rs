//! # One transcoder process, start to reap.
//!
//! [`ProcessRunner`] owns exactly one OS process for one camera. It has no
//! retry logic; the supervisory loop decides what happens after an exit.
//!
//! ## Flow
//! ```text
//! start(cmd)  ── spawn (kill_on_drop) ──► pid
//!               └─► stdout/stderr line monitors (log only, detached)
//!
//! wait()  ── select! ──┬─ cancel token fired ──► terminate(grace) ──► ExitOutcome::Canceled
//!                      └─ child exited      ──► ExitOutcome::Exited { code }
//!
//! stop()  ── cancel token, terminate(grace): SIGTERM → wait ≤ grace → SIGKILL
//! ```
//!
//! ## Rules
//! - Cancellation wins ties: an exit observed after the token fired is `Canceled`.
//! - `stop()` is idempotent; stopping a runner without a child is a no-op.
//! - Dropping a runner kills a still-running child (`kill_on_drop`).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::stream::transcoder::CommandLine;

/// How a process run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Terminated because the runner was cancelled (expected, not a failure).
    Canceled,
    /// The process exited on its own; `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// Waiting on the process failed at the OS level.
    Lost(String),
}

impl ExitOutcome {
    /// Maps the outcome to the supervisory loop's view.
    ///
    /// A clean exit (`code = 0`) is `Ok`; the loop still reconnects.
    pub fn into_result(self) -> Result<(), StreamError> {
        match self {
            ExitOutcome::Canceled => Err(StreamError::Canceled),
            ExitOutcome::Exited { code: Some(0) } => Ok(()),
            ExitOutcome::Exited { code } => Err(StreamError::ProcessExited { code }),
            ExitOutcome::Lost(_) => Err(StreamError::ProcessExited { code: None }),
        }
    }
}

/// Severity of one line of transcoder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLevel {
    Error,
    Warning,
    Info,
}

/// Classifies a line by case-insensitive substring match.
pub fn classify_line(line: &str) -> LineLevel {
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") {
        LineLevel::Error
    } else if lower.contains("warning") {
        LineLevel::Warning
    } else {
        LineLevel::Info
    }
}

/// Lifecycle owner of a single transcoder process.
pub struct ProcessRunner {
    camera_id: Arc<str>,
    grace: Duration,
    cancel: CancellationToken,
    child: Option<Child>,
}

impl ProcessRunner {
    /// Creates a runner whose cancellation scope is a child of `parent`.
    pub fn new(camera_id: impl Into<Arc<str>>, grace: Duration, parent: &CancellationToken) -> Self {
        Self {
            camera_id: camera_id.into(),
            grace,
            cancel: parent.child_token(),
            child: None,
        }
    }

    /// Launches the process and attaches the output monitors.
    ///
    /// Returns the OS pid once the process is running.
    pub fn start(&mut self, cmd: &CommandLine) -> Result<u32, StreamError> {
        if self.child.is_some() {
            return Err(StreamError::SpawnFailed {
                camera_id: self.camera_id.to_string(),
                reason: "process already running".into(),
            });
        }
        if self.cancel.is_cancelled() {
            return Err(StreamError::Canceled);
        }

        tracing::debug!(camera_id = %self.camera_id, command = %cmd, "launching transcoder");
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!(
                    camera_id = %self.camera_id,
                    program = %cmd.program.display(),
                    error = %e,
                    "failed to start transcoder"
                );
                StreamError::SpawnFailed {
                    camera_id: self.camera_id.to_string(),
                    reason: e.to_string(),
                }
            })?;

        if let Some(out) = child.stdout.take() {
            spawn_monitor(self.camera_id.clone(), "stdout", out);
        }
        if let Some(err) = child.stderr.take() {
            spawn_monitor(self.camera_id.clone(), "stderr", err);
        }

        let pid = child.id().unwrap_or_default();
        tracing::info!(camera_id = %self.camera_id, pid, "transcoder started");
        self.child = Some(child);
        Ok(pid)
    }

    /// Blocks until the process ends or the runner is cancelled.
    pub async fn wait(&mut self) -> ExitOutcome {
        let cancel = self.cancel.clone();
        let Some(child) = self.child.as_mut() else {
            return if cancel.is_cancelled() {
                ExitOutcome::Canceled
            } else {
                ExitOutcome::Lost("process not started".into())
            };
        };

        let exited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = child.wait() => Some(res),
        };

        match exited {
            None => {
                self.terminate().await;
                ExitOutcome::Canceled
            }
            Some(_) if cancel.is_cancelled() => {
                self.child = None;
                ExitOutcome::Canceled
            }
            Some(Ok(status)) => {
                self.child = None;
                let code = status.code();
                if code == Some(0) {
                    tracing::info!(camera_id = %self.camera_id, "transcoder exited cleanly");
                } else {
                    tracing::error!(camera_id = %self.camera_id, exit_code = ?code, "transcoder exited with error");
                }
                ExitOutcome::Exited { code }
            }
            Some(Err(e)) => {
                self.child = None;
                tracing::error!(camera_id = %self.camera_id, error = %e, "lost track of transcoder");
                ExitOutcome::Lost(e.to_string())
            }
        }
    }

    /// Cancels the runner and terminates the process (grace, then kill).
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.terminate().await;
    }

    /// OS pid of the running process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. No-op without a child.
    async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        request_exit(&mut child);
        match time::timeout(self.grace, child.wait()).await {
            Ok(_) => {
                tracing::info!(camera_id = %self.camera_id, "transcoder stopped");
            }
            Err(_elapsed) => {
                tracing::warn!(camera_id = %self.camera_id, grace = ?self.grace, "force killing transcoder");
                if let Err(e) = child.kill().await {
                    tracing::error!(camera_id = %self.camera_id, error = %e, "failed to kill transcoder");
                }
            }
        }
    }
}

/// Asks the process to exit on its own.
#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

/// Asks the process to exit on its own.
#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.start_kill();
}

/// Logs each output line at the severity it announces. Ends at EOF.
fn spawn_monitor<R>(camera_id: Arc<str>, source: &'static str, pipe: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match classify_line(&line) {
                    LineLevel::Error => {
                        tracing::error!(camera_id = %camera_id, source, message = %line, "transcoder error")
                    }
                    LineLevel::Warning => {
                        tracing::warn!(camera_id = %camera_id, source, message = %line, "transcoder warning")
                    }
                    LineLevel::Info => {
                        tracing::debug!(camera_id = %camera_id, source, message = %line, "transcoder output")
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(camera_id = %camera_id, source, error = %e, "error reading transcoder output");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("/bin/sh", ["-c", script])
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("[rtsp] Connection ERROR: refused"), LineLevel::Error);
        assert_eq!(classify_line("Warning: non-monotonous DTS"), LineLevel::Warning);
        assert_eq!(classify_line("frame=  120 fps= 15"), LineLevel::Info);
    }

    #[test]
    fn test_exit_outcome_mapping() {
        assert_eq!(ExitOutcome::Exited { code: Some(0) }.into_result(), Ok(()));
        assert_eq!(
            ExitOutcome::Exited { code: Some(1) }.into_result(),
            Err(StreamError::ProcessExited { code: Some(1) })
        );
        assert_eq!(ExitOutcome::Canceled.into_result(), Err(StreamError::Canceled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reported() {
        let token = CancellationToken::new();
        let mut runner = ProcessRunner::new("cam1", Duration::from_secs(2), &token);
        runner.start(&sh("echo 'fatal error' >&2; exit 3")).unwrap();
        assert_eq!(runner.wait().await, ExitOutcome::Exited { code: Some(3) });
        assert!(runner.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure() {
        let token = CancellationToken::new();
        let mut runner = ProcessRunner::new("cam1", Duration::from_secs(2), &token);
        let err = runner
            .start(&CommandLine::new("/nonexistent/transcoder", ["-i", "x"]))
            .unwrap_err();
        assert_eq!(err.as_label(), "spawn_failed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_unblocks_wait() {
        let token = CancellationToken::new();
        let mut runner = ProcessRunner::new("cam1", Duration::from_secs(2), &token);
        runner.start(&sh("sleep 30")).unwrap();

        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            t.cancel();
        });

        let started = Instant::now();
        assert_eq!(runner.wait().await, ExitOutcome::Canceled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_after_grace_and_is_idempotent() {
        let token = CancellationToken::new();
        let mut runner = ProcessRunner::new("cam1", Duration::from_millis(200), &token);
        // Ignores SIGTERM, so only the kill after the grace window ends it.
        let pid = runner.start(&sh("trap '' TERM; sleep 30 & wait")).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.stop().await;
        runner.stop().await;

        assert!(runner.pid().is_none());
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
        assert!(!alive, "pid {pid} still running after stop");
    }
}
