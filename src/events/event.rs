//! # Camera status events.
//!
//! [`StreamStatus`] is the lifecycle state of one camera worker; a
//! [`StatusEvent`] is an immutable record of one transition, pushed to the
//! bounded status queue by the camera's supervisory loop.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Per camera, events are produced by a single loop and are
//! therefore totally ordered; across cameras use `seq` to merge.
//!
//! ## Example
//! ```rust
//! use relayvisor::{StatusEvent, StreamStatus};
//!
//! let ev = StatusEvent::now("cam1", StreamStatus::Reconnecting)
//!     .with_error("transcoder exited (code Some(1))");
//!
//! assert_eq!(ev.camera_id.as_ref(), "cam1");
//! assert_eq!(ev.status, StreamStatus::Reconnecting);
//! assert!(ev.error.is_some());
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use serde::Serialize;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a camera worker.
///
/// ```text
/// Disconnected ─► Connecting ─► Connected ─┬─► Disconnected (clean exit) ─► Connecting ...
///                     ▲                     └─► Reconnecting ─► Connecting ...
///                     │                                      └─► Error (budget spent)
///                     └──────────────── after cooldown ◄─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// No process; initial state and state after a clean exit or stop.
    #[default]
    Disconnected,
    /// Admitted through the gate, process is being launched.
    Connecting,
    /// Process is running.
    Connected,
    /// Last attempt failed, retry scheduled.
    Reconnecting,
    /// Retry budget exhausted; cooling down before a fresh cycle.
    Error,
}

impl StreamStatus {
    /// Returns a short stable label (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Disconnected => "disconnected",
            StreamStatus::Connecting => "connecting",
            StreamStatus::Connected => "connected",
            StreamStatus::Reconnecting => "reconnecting",
            StreamStatus::Error => "error",
        }
    }

    /// `true` while a process is being launched or is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, StreamStatus::Connecting | StreamStatus::Connected)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status transition of one camera.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - `error`: failure text for `Reconnecting` / `Error`
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Camera the transition belongs to.
    pub camera_id: Arc<str>,
    /// New status.
    pub status: StreamStatus,
    /// Human-readable failure text, if any.
    pub error: Option<Arc<str>>,
    /// Wall-clock timestamp.
    pub at: SystemTime,
}

impl StatusEvent {
    /// Creates an event with the current timestamp and next sequence number.
    pub fn now(camera_id: impl Into<Arc<str>>, status: StreamStatus) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            camera_id: camera_id.into(),
            status,
            error: None,
            at: SystemTime::now(),
        }
    }

    /// Attaches failure text.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = StatusEvent::now("cam1", StreamStatus::Connecting);
        let b = StatusEvent::now("cam2", StreamStatus::Connecting);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_serializes_snake_case() {
        let ev = StatusEvent::now("cam1", StreamStatus::Reconnecting).with_error("boom");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["status"], "reconnecting");
        assert_eq!(json["camera_id"], "cam1");
        assert_eq!(json["error"], "boom");
    }
}
