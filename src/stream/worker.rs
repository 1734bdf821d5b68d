//! # Per-camera worker record.
//!
//! A [`StreamWorker`] exists for every supervised camera, from `add_camera`
//! until `remove_camera`. Its state is written only by the camera's own
//! supervisory loop and read concurrently by status queries through a
//! short-lived read lock (no I/O under the lock).
//!
//! Each worker owns its cancellation scope: a child of the engine's root
//! token. Every [`ProcessRunner`] launched for the camera is a child of it, so
//! [`StreamWorker::stop`] unblocks any in-progress wait and terminates the process.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::CameraSpec;
use crate::events::StreamStatus;
use crate::stream::process::ProcessRunner;

/// Point-in-time view of one worker, safe to hand to reporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub camera_id: String,
    pub name: String,
    pub status: StreamStatus,
    pub pid: Option<u32>,
    /// Wall-clock start of the current process, if one is running.
    pub started_at: Option<SystemTime>,
    /// Time since the current process started.
    pub uptime: Option<Duration>,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Default)]
struct WorkerState {
    status: StreamStatus,
    pid: Option<u32>,
    started_at: Option<(SystemTime, Instant)>,
    last_error: Option<String>,
    retry_count: u32,
}

/// Lifecycle record of one camera.
pub struct StreamWorker {
    camera: CameraSpec,
    id: Arc<str>,
    cancel: CancellationToken,
    state: RwLock<WorkerState>,
}

impl StreamWorker {
    /// Creates a worker in `Disconnected` state under the given parent scope.
    pub fn new(camera: CameraSpec, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id: Arc::from(camera.id.as_str()),
            camera,
            cancel: parent.child_token(),
            state: RwLock::new(WorkerState::default()),
        })
    }

    /// Camera this worker supervises.
    pub fn camera(&self) -> &CameraSpec {
        &self.camera
    }

    /// Camera id (shared, cheap to clone into events).
    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    /// The worker's cancellation scope.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Creates a runner for one process run, scoped to this worker.
    pub fn runner(&self, grace: Duration) -> ProcessRunner {
        ProcessRunner::new(self.id.clone(), grace, &self.cancel)
    }

    /// Stops the worker: cancels its scope (the loop terminates its process).
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> StreamStatus {
        self.state.read().status
    }

    pub fn retry_count(&self) -> u32 {
        self.state.read().retry_count
    }

    pub(crate) fn set_status(&self, status: StreamStatus) {
        self.state.write().status = status;
    }

    /// Records a running process.
    pub(crate) fn mark_started(&self, pid: u32) {
        let mut st = self.state.write();
        st.pid = Some(pid);
        st.started_at = Some((SystemTime::now(), Instant::now()));
    }

    /// Clears process fields; returns how long the process ran.
    pub(crate) fn mark_exited(&self) -> Duration {
        let mut st = self.state.write();
        st.pid = None;
        st.started_at
            .take()
            .map(|(_, at)| at.elapsed())
            .unwrap_or_default()
    }

    pub(crate) fn set_last_error(&self, err: impl Into<String>) {
        self.state.write().last_error = Some(err.into());
    }

    /// Increments the retry counter and returns the new value.
    pub(crate) fn bump_retry(&self) -> u32 {
        let mut st = self.state.write();
        st.retry_count = st.retry_count.saturating_add(1);
        st.retry_count
    }

    pub(crate) fn reset_retries(&self) {
        self.state.write().retry_count = 0;
    }

    /// Returns a consistent view of the worker.
    pub fn snapshot(&self) -> WorkerSnapshot {
        let st = self.state.read();
        WorkerSnapshot {
            camera_id: self.camera.id.clone(),
            name: self.camera.name.clone(),
            status: st.status,
            pid: st.pid,
            started_at: st.started_at.map(|(wall, _)| wall),
            uptime: st.started_at.map(|(_, at)| at.elapsed()),
            last_error: st.last_error.clone(),
            retry_count: st.retry_count,
        }
    }
}
