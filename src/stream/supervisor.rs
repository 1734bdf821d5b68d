//! # StreamSupervisor: the per-camera worker set.
//!
//! Owns one [`StreamWorker`] and one supervisory loop per camera, a shared
//! admission gate sized to [`StreamConfig::max_concurrency`], and the producer
//! side of the bounded status queue.
//!
//! ## Architecture
//! ```text
//! StreamSupervisor::new(cfg, transcoder) ──► (Arc<StreamSupervisor>, StatusStream)
//!
//! start(cameras) ──► add_camera(spec)   (enabled cameras only)
//!                      ├─► StreamWorker::new(spec, root.child_token())
//!                      ├─► StreamActor::new(worker, transcoder, policy, queue, gate)
//!                      └─► tokio::spawn(actor.run()) ──► workers[id] = Handle
//!
//! remove_camera(id) ──► take Handle (write lock) ──► worker.stop() ──► join
//!
//! stop() ──► root.cancel() ──► drain workers ──► join each (≤ shutdown_grace)
//!              ├─ all joined → Ok(())
//!              └─ timeout    → abort stuck → Err(GraceExceeded)
//!           └─► drop queue producer (StatusStream ends once loops are gone)
//! ```
//!
//! ## Rules
//! - The worker map is the only state shared by writers; add/remove take the
//!   write lock, snapshots take the read lock.
//! - Handles are taken out of the map before they are joined; no lock is held
//!   across a join.
//! - After `stop()` returns no transcoder process started by this engine is alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::{CameraSpec, StreamConfig};
use crate::error::{RuntimeError, StreamError};
use crate::events::{StatusQueue, StatusStream, StreamStatus};
use crate::stream::actor::StreamActor;
use crate::stream::transcoder::Transcoder;
use crate::stream::worker::{StreamWorker, WorkerSnapshot};

/// Handle to a running camera loop.
struct Handle {
    worker: Arc<StreamWorker>,
    join: JoinHandle<()>,
}

/// Supervises the transcoder processes of all configured cameras.
pub struct StreamSupervisor {
    cfg: StreamConfig,
    transcoder: Arc<dyn Transcoder>,
    root: CancellationToken,
    gate: Arc<Semaphore>,
    workers: RwLock<HashMap<String, Handle>>,
    queue: Mutex<Option<StatusQueue>>,
}

impl StreamSupervisor {
    /// Creates an engine and the consumer side of its status queue.
    pub fn new(cfg: StreamConfig, transcoder: Arc<dyn Transcoder>) -> (Arc<Self>, StatusStream) {
        let (queue, stream) = StatusQueue::channel(cfg.status_capacity_clamped());
        let gate = Arc::new(Semaphore::new(cfg.concurrency_limit()));
        let sup = Arc::new(Self {
            cfg,
            transcoder,
            root: CancellationToken::new(),
            gate,
            workers: RwLock::new(HashMap::new()),
            queue: Mutex::new(Some(queue)),
        });
        (sup, stream)
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &StreamConfig {
        &self.cfg
    }

    /// Launches a loop for every enabled camera; returns how many were started.
    ///
    /// Duplicate ids are logged and skipped.
    pub async fn start(&self, cameras: impl IntoIterator<Item = CameraSpec>) -> usize {
        let mut started = 0;
        for camera in cameras {
            if !camera.enabled {
                tracing::debug!(camera_id = %camera.id, "camera disabled, skipping");
                continue;
            }
            let id = camera.id.clone();
            match self.add_camera(camera).await {
                Ok(()) => started += 1,
                Err(e) => tracing::warn!(camera_id = %id, error = %e, "camera not started"),
            }
        }
        tracing::info!(cameras = started, max_concurrency = self.cfg.concurrency_limit(), "stream supervisor started");
        started
    }

    /// Adds a camera and launches its loop.
    ///
    /// Fails with `CameraExists` for a supervised id and `Canceled` after `stop()`.
    pub async fn add_camera(&self, camera: CameraSpec) -> Result<(), StreamError> {
        let queue = self.queue.lock().clone();
        let Some(queue) = queue else {
            return Err(StreamError::Canceled);
        };
        if self.root.is_cancelled() {
            return Err(StreamError::Canceled);
        }

        let mut workers = self.workers.write().await;
        if workers.contains_key(&camera.id) {
            return Err(StreamError::CameraExists(camera.id));
        }

        let id = camera.id.clone();
        let policy = self.cfg.retry_policy_for(&camera);
        let worker = StreamWorker::new(camera, &self.root);
        let actor = StreamActor::new(
            worker.clone(),
            self.transcoder.clone(),
            policy,
            self.cfg.stop_grace,
            queue,
            self.gate.clone(),
        );
        let join = tokio::spawn(actor.run());
        workers.insert(id.clone(), Handle { worker, join });
        drop(workers);

        tracing::info!(camera_id = %id, "camera added");
        Ok(())
    }

    /// Stops a camera's process and discards its worker.
    pub async fn remove_camera(&self, id: &str) -> Result<(), StreamError> {
        let handle = self.workers.write().await.remove(id);
        let Some(handle) = handle else {
            return Err(StreamError::CameraNotFound(id.to_string()));
        };

        handle.worker.stop();
        self.join(id, handle.join).await;
        tracing::info!(camera_id = %id, "camera removed");
        Ok(())
    }

    /// Replaces a camera's configuration (remove then add).
    ///
    /// A missing old entry is tolerated; a disabled camera is only removed.
    pub async fn update_camera(&self, camera: CameraSpec) -> Result<(), StreamError> {
        match self.remove_camera(&camera.id).await {
            Ok(()) | Err(StreamError::CameraNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        if !camera.enabled {
            return Ok(());
        }
        self.add_camera(camera).await
    }

    /// Restarts one camera with a fresh worker and retry budget.
    pub async fn restart_camera(&self, id: &str) -> Result<(), StreamError> {
        let camera = self
            .workers
            .read()
            .await
            .get(id)
            .map(|h| h.worker.camera().clone())
            .ok_or_else(|| StreamError::CameraNotFound(id.to_string()))?;
        self.remove_camera(id).await?;
        self.add_camera(camera).await
    }

    /// Status of every supervised camera.
    pub async fn status(&self) -> HashMap<String, StreamStatus> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .map(|(id, h)| (id.clone(), h.worker.status()))
            .collect()
    }

    /// Status of one camera, `None` if unknown.
    pub async fn camera_status(&self, id: &str) -> Option<StreamStatus> {
        self.workers.read().await.get(id).map(|h| h.worker.status())
    }

    /// Detailed view of every worker, sorted by camera id.
    pub async fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let mut out: Vec<WorkerSnapshot> = {
            let workers = self.workers.read().await;
            workers.values().map(|h| h.worker.snapshot()).collect()
        };
        out.sort_unstable_by(|a, b| a.camera_id.cmp(&b.camera_id));
        out
    }

    /// Detailed view of one worker.
    pub async fn snapshot(&self, id: &str) -> Option<WorkerSnapshot> {
        self.workers.read().await.get(id).map(|h| h.worker.snapshot())
    }

    /// Cancels every loop and waits for them to exit within `shutdown_grace`.
    ///
    /// Loops still running after the grace are aborted (their processes are
    /// killed on drop) and reported in [`RuntimeError::GraceExceeded`].
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        tracing::info!("stream supervisor stopping");
        self.root.cancel();

        let handles: Vec<(String, Handle)> = self.workers.write().await.drain().collect();
        let grace = self.cfg.shutdown_grace;
        let deadline = time::Instant::now() + grace;
        let mut stuck = Vec::new();

        for (id, mut h) in handles {
            let res = time::timeout_at(deadline, &mut h.join).await;
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(camera_id = %id, error = %e, "supervisory loop panicked"),
                Err(_elapsed) => {
                    reap_aborted(&id, h.join).await;
                    stuck.push(id);
                }
            }
        }
        self.queue.lock().take();

        if stuck.is_empty() {
            tracing::info!("all camera loops stopped within grace");
            Ok(())
        } else {
            stuck.sort_unstable();
            let err = RuntimeError::GraceExceeded { grace, stuck };
            tracing::error!(error = %err, "shutdown drain incomplete");
            Err(err)
        }
    }

    async fn join(&self, id: &str, mut join: JoinHandle<()>) {
        let res = time::timeout(self.cfg.shutdown_grace, &mut join).await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(camera_id = %id, error = %e, "supervisory loop panicked"),
            Err(_elapsed) => {
                tracing::warn!(camera_id = %id, "supervisory loop did not stop in time, aborting");
                reap_aborted(id, join).await;
            }
        }
    }
}

/// Aborts a loop and waits until its task is dropped, so `kill_on_drop` has fired.
async fn reap_aborted(id: &str, join: JoinHandle<()>) {
    join.abort();
    match join.await {
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(camera_id = %id, error = %e, "supervisory loop panicked"),
        Ok(()) => {}
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
