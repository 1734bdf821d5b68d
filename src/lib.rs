//! # relayvisor
//!
//! **Relayvisor** is the runtime core of an unattended edge agent.
//!
//! It keeps one external transcoder process alive per camera despite flaky
//! cameras and networks, and keeps the agent's own executable current
//! through a staged, verified, atomically activated self-update.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  CameraSpec  │   │  CameraSpec  │   │  CameraSpec  │
//!     │    (cam1)    │   │    (cam2)    │   │    (camN)    │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  StreamSupervisor                                                 │
//! │  - root CancellationToken                                         │
//! │  - admission gate (Semaphore, max_concurrency)                    │
//! │  - worker map (RwLock<HashMap<id, Handle>>)                       │
//! │  - StatusQueue (bounded, drop newest when full)                   │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ StreamActor  │   │ StreamActor  │   │ StreamActor  │
//!     │ (retry loop) │   │ (retry loop) │   │ (retry loop) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//!     ProcessRunner       ProcessRunner       ProcessRunner
//!     (ffmpeg pid)        (ffmpeg pid)        (waiting at gate)
//!            │                  │
//!            └──── StatusEvent ─┴──► StatusStream (host reporter)
//!
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  UpdateEngine (independent periodic loop)                         │
//! │  ManifestResolver ─► UpdatePipeline ─► Restarter                  │
//! │  (messaging | fallback)  (stage, verify, install, cutover, prune) │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Camera lifecycle
//! ```text
//! loop {
//!   ├─► acquire gate permit (cancellable)
//!   ├─► Connecting ─► spawn transcoder ─► Connected ─► wait for exit
//!   ├─► release permit
//!   ├─ exit 0  ─► Disconnected, retry = 0, reconnect after base delay
//!   └─ failure ─► retry += 1
//!                  ├─ retry ≤ max ─► Reconnecting, sleep(base × retry, ≤ 30s)
//!                  └─ retry > max ─► Error, sleep(cooldown), retry = 0
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types                                   |
//! |-------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Per-camera process loops behind an admission gate.       | [`StreamSupervisor`], [`WorkerSnapshot`]    |
//! | **Processes**     | Command construction and OS process lifecycle.           | [`Transcoder`], [`ProcessRunner`]           |
//! | **Status**        | Bounded, drainable stream of lifecycle transitions.      | [`StatusEvent`], [`StatusStream`]           |
//! | **Policies**      | Linear retry with cooldown; schedule jitter.             | [`RetryPolicy`], [`Jitter`]                 |
//! | **Updates**       | Manifest resolution, atomic install, restart.            | [`UpdateEngine`], [`UpdatePipeline`]        |
//! | **Errors**        | Typed errors with stable log labels.                     | [`StreamError`], [`UpdateError`]            |
//! | **Configuration** | Serde-loadable settings with documented defaults.        | [`StreamConfig`], [`UpdaterConfig`]         |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use relayvisor::{CameraSpec, FfmpegTranscoder, StreamConfig, StreamSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transcoder = Arc::new(FfmpegTranscoder::default());
//!     let (sup, mut events) = StreamSupervisor::new(StreamConfig::default(), transcoder);
//!
//!     sup.start([CameraSpec::new("cam1", "rtsp://10.0.0.5:554/h264")]).await;
//!     tokio::spawn(async move {
//!         while let Some(ev) = events.recv().await {
//!             println!("{} -> {}", ev.camera_id, ev.status);
//!         }
//!     });
//!
//!     relayvisor::shutdown_signal().await?;
//!     sup.stop().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod error;
mod events;
mod policies;
mod stream;
mod update;

// ---- Public re-exports ----

pub use config::{CameraSpec, SinkConfig, StreamConfig, TranscoderConfig, UpdaterConfig};
pub use error::{RuntimeError, StreamError, UpdateError};
pub use events::{StatusEvent, StatusQueue, StatusStream, StreamStatus};
pub use policies::{Jitter, RetryPolicy};
pub use stream::{
    CommandLine, ExitOutcome, FfmpegTranscoder, LineLevel, ProcessRunner, StreamSupervisor, StreamWorker,
    Transcoder, WorkerSnapshot, classify_line, shutdown_signal,
};
pub use update::{
    CycleOutcome, Incompatibility, ManifestResolver, Manifest, MessagingError, Messenger, Platform, ReleaseLayout,
    Restarter, ServiceRestarter, UPDATE_CHECK_EVENT, UPDATE_RESPONSE_EVENT, UpdateCheckRequest, UpdateCheckResponse,
    UpdateEngine, UpdatePipeline, UpdateStage, parse_version, sha256_file, sort_releases, version_gate,
};
