//! # StreamActor: one camera's supervisory loop.
//!
//! Two nested state machines: an inner bounded-retry cycle and an outer
//! unbounded loop that grants a fresh budget after a cooldown, so a camera is
//! never abandoned while the engine runs.
//!
//! ## Architecture
//! ```text
//! run() loop {
//!   run_cycle() loop {
//!     ├─► acquire gate permit          (cancellable)
//!     ├─► Connecting ─► runner.start()
//!     │       └─ Err(SpawnFailed) ──────────────────────────┐
//!     ├─► Connected  ─► runner.wait()                       │
//!     ├─► release permit                                    │
//!     ├─► exit 0   → Disconnected, retry = 0, delay = base  │
//!     └─► failure  → retry += 1 ◄───────────────────────────┘
//!           ├─ retry > max → Error ─► return Exhausted
//!           └─ otherwise   → Reconnecting, delay = base × retry (≤ max)
//!     sleep(delay)                     (cancellable)
//!   }
//!   Exhausted → sleep(cooldown) → retry = 0 → next cycle
//!   Canceled  → break
//! }
//! ```
//!
//! ## Rules
//! - The gate permit is held only while a process is being launched or running.
//! - Cancellation is checked before every transition and wins every race.
//! - A failed run that stayed up for `healthy_after` forgives prior failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::{select, sync::Semaphore, time};
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::events::{StatusEvent, StatusQueue, StreamStatus};
use crate::policies::RetryPolicy;
use crate::stream::transcoder::Transcoder;
use crate::stream::worker::StreamWorker;

/// How an inner retry cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Exhausted,
    Canceled,
}

/// Drives one camera's worker until its scope is cancelled.
pub(crate) struct StreamActor {
    worker: Arc<StreamWorker>,
    transcoder: Arc<dyn Transcoder>,
    policy: RetryPolicy,
    stop_grace: Duration,
    queue: StatusQueue,
    gate: Arc<Semaphore>,
}

impl StreamActor {
    pub(crate) fn new(
        worker: Arc<StreamWorker>,
        transcoder: Arc<dyn Transcoder>,
        policy: RetryPolicy,
        stop_grace: Duration,
        queue: StatusQueue,
        gate: Arc<Semaphore>,
    ) -> Self {
        Self {
            worker,
            transcoder,
            policy,
            stop_grace,
            queue,
            gate,
        }
    }

    /// Runs until the worker's token is cancelled.
    pub(crate) async fn run(self) {
        let token = self.worker.token().clone();
        tracing::info!(camera_id = %self.worker.id(), "supervisory loop started");

        loop {
            match self.run_cycle(&token).await {
                CycleEnd::Canceled => break,
                CycleEnd::Exhausted => {
                    tracing::warn!(
                        camera_id = %self.worker.id(),
                        max_retries = self.policy.max_retries,
                        cooldown = ?self.policy.cooldown,
                        "retry budget exhausted, cooling down"
                    );
                    if !sleep_or_cancel(self.policy.cooldown, &token).await {
                        break;
                    }
                    self.worker.reset_retries();
                }
            }
        }

        self.worker.mark_exited();
        self.worker.set_status(StreamStatus::Disconnected);
        tracing::info!(camera_id = %self.worker.id(), "supervisory loop stopped");
    }

    /// Inner bounded-retry cycle.
    async fn run_cycle(&self, token: &CancellationToken) -> CycleEnd {
        loop {
            if token.is_cancelled() {
                return CycleEnd::Canceled;
            }

            let permit = select! {
                res = self.gate.clone().acquire_owned() => match res {
                    Ok(permit) => permit,
                    Err(_closed) => return CycleEnd::Canceled,
                },
                _ = token.cancelled() => return CycleEnd::Canceled,
            };

            let (result, uptime) = self.run_once(token).await;
            drop(permit);

            let delay = match result {
                Err(err) if !err.is_retryable() => {
                    tracing::debug!(camera_id = %self.worker.id(), reason = err.as_label(), "attempt not retried");
                    return CycleEnd::Canceled;
                }
                Ok(()) => {
                    self.worker.reset_retries();
                    self.transition(StreamStatus::Disconnected, None);
                    self.policy.delay_for(0)
                }
                Err(err) => {
                    if self.policy.is_healthy_run(uptime) {
                        self.worker.reset_retries();
                    }
                    let retry = self.worker.bump_retry();
                    let msg = err.to_string();
                    self.worker.set_last_error(msg.clone());

                    if self.policy.is_exhausted(retry) {
                        self.transition(StreamStatus::Error, Some(msg));
                        return CycleEnd::Exhausted;
                    }

                    let delay = self.policy.delay_for(retry);
                    tracing::warn!(
                        camera_id = %self.worker.id(),
                        error = %err,
                        retry,
                        max_retries = self.policy.max_retries,
                        delay = ?delay,
                        "transcoder failed, scheduling reconnect"
                    );
                    self.transition(StreamStatus::Reconnecting, Some(msg));
                    delay
                }
            };

            if !sleep_or_cancel(delay, token).await {
                return CycleEnd::Canceled;
            }
        }
    }

    /// One process run; returns the outcome and how long the process was up.
    async fn run_once(&self, token: &CancellationToken) -> (Result<(), StreamError>, Duration) {
        self.transition(StreamStatus::Connecting, None);

        let cmd = self.transcoder.command(self.worker.camera());
        let mut runner = self.worker.runner(self.stop_grace);
        let pid = match runner.start(&cmd) {
            Ok(pid) => pid,
            Err(e) => return (Err(e), Duration::ZERO),
        };

        self.worker.mark_started(pid);
        if token.is_cancelled() {
            runner.stop().await;
            return (Err(StreamError::Canceled), self.worker.mark_exited());
        }
        self.transition(StreamStatus::Connected, None);

        let outcome = runner.wait().await;
        let uptime = self.worker.mark_exited();
        (outcome.into_result(), uptime)
    }

    /// Records the new status and publishes the event.
    fn transition(&self, status: StreamStatus, error: Option<String>) {
        self.worker.set_status(status);
        let mut ev = StatusEvent::now(self.worker.id().clone(), status);
        if let Some(e) = error {
            ev = ev.with_error(e);
        }
        self.queue.publish(ev);
    }
}

/// Sleeps for `delay`; returns `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    select! {
        _ = &mut sleep => true,
        _ = token.cancelled() => false,
    }
}
