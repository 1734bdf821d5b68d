//! Restarting the agent after an install.
//!
//! [`ServiceRestarter`] asks the host service manager first
//! (`systemctl restart <service>`, bounded by `health_timeout`). If that fails,
//! times out, or the host has no systemd, the process exits with status 0 and
//! the external supervisor relaunches it through the new `current` pointer.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time;

/// Restarts the running agent.
#[async_trait]
pub trait Restarter: Send + Sync + 'static {
    async fn restart(&self, service: &str, timeout: Duration);
}

/// Service-manager restart with self-exit fallback.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceRestarter;

#[async_trait]
impl Restarter for ServiceRestarter {
    async fn restart(&self, service: &str, timeout: Duration) {
        if cfg!(target_os = "linux") {
            tracing::info!(service, "restarting via service manager");
            let status = Command::new("systemctl")
                .args(["restart", service])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .status();
            match time::timeout(timeout, status).await {
                Ok(Ok(s)) if s.success() => {
                    tracing::info!(service, "service manager accepted restart");
                    return;
                }
                Ok(Ok(s)) => tracing::warn!(service, exit_code = ?s.code(), "service restart failed"),
                Ok(Err(e)) => tracing::warn!(service, error = %e, "could not run systemctl"),
                Err(_elapsed) => tracing::warn!(service, timeout = ?timeout, "service restart timed out"),
            }
        }
        tracing::warn!("exiting for external supervisor to relaunch");
        std::process::exit(0);
    }
}
