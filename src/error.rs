//! Error types used by the stream supervisor and the update engine.
//!
//! This module defines three enums:
//!
//! - [`StreamError`]: failures of a single camera's transcoder process or of worker-set edits.
//! - [`UpdateError`]: failures that abort one update cycle.
//! - [`RuntimeError`]: failures of the supervisor's own shutdown drain.
//!
//! Every enum provides `as_label` (stable snake_case label for logs).
//! "Nothing to do" outcomes (no manifest, incompatible manifest, not newer)
//! are **not** errors; see [`CycleOutcome`](crate::CycleOutcome).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a camera's process lifecycle.
///
/// Camera-level failures never leave the camera's supervisory loop; they are
/// counted against its retry budget and surfaced through status events.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The transcoder process could not be launched.
    #[error("failed to spawn transcoder for camera {camera_id}: {reason}")]
    SpawnFailed {
        /// Camera the process belonged to.
        camera_id: String,
        /// OS-level reason.
        reason: String,
    },

    /// The transcoder exited on its own (any exit of a continuous stream is a drop).
    #[error("transcoder exited (code {code:?})")]
    ProcessExited {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
    },

    /// The wait was interrupted by cancellation (expected during stop/shutdown).
    #[error("context cancelled")]
    Canceled,

    /// `add_camera` was called with an id that is already supervised.
    #[error("camera already exists: {0}")]
    CameraExists(String),

    /// The camera id is not supervised.
    #[error("camera not found: {0}")]
    CameraNotFound(String),
}

impl StreamError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use relayvisor::StreamError;
    ///
    /// let err = StreamError::ProcessExited { code: Some(1) };
    /// assert_eq!(err.as_label(), "process_exited");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StreamError::SpawnFailed { .. } => "spawn_failed",
            StreamError::ProcessExited { .. } => "process_exited",
            StreamError::Canceled => "canceled",
            StreamError::CameraExists(_) => "camera_exists",
            StreamError::CameraNotFound(_) => "camera_not_found",
        }
    }

    /// Indicates whether the supervisory loop should schedule another attempt.
    ///
    /// `SpawnFailed` is counted as a failed attempt and retried like an exit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::SpawnFailed { .. } | StreamError::ProcessExited { .. }
        )
    }
}

/// # Errors that abort one update cycle.
///
/// The current pointer and existing releases are untouched whenever one of
/// these is returned.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The messaging collaborator refused the update-check request.
    #[error("messaging: {0}")]
    Messaging(String),

    /// A version string could not be parsed.
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion {
        /// Offending input.
        version: String,
        /// Parser message.
        reason: String,
    },

    /// The artifact could not be fetched or staged.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The staged artifact does not hash to the manifest's checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum from the manifest.
        expected: String,
        /// Checksum computed over the staged artifact.
        actual: String,
    },

    /// Copying the release or repointing `current` failed.
    #[error("install failed: {0}")]
    InstallFailed(String),

    /// Filesystem error outside the staged stages (layout, pruning).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Global cancellation interrupted the cycle.
    #[error("update cycle cancelled")]
    Canceled,
}

impl UpdateError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            UpdateError::Messaging(_) => "update_messaging",
            UpdateError::InvalidVersion { .. } => "update_invalid_version",
            UpdateError::DownloadFailed(_) => "update_download_failed",
            UpdateError::ChecksumMismatch { .. } => "update_checksum_mismatch",
            UpdateError::InstallFailed(_) => "update_install_failed",
            UpdateError::Io(_) => "update_io",
            UpdateError::Canceled => "update_canceled",
        }
    }
}

/// # Errors produced by the supervisor runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; the listed cameras were aborted.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Cameras whose loops did not exit in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let spawn = StreamError::SpawnFailed {
            camera_id: "cam1".into(),
            reason: "No such file or directory".into(),
        };
        assert!(spawn.is_retryable());
        assert!(StreamError::ProcessExited { code: Some(0) }.is_retryable());
        assert!(!StreamError::Canceled.is_retryable());
        assert!(!StreamError::CameraExists("cam1".into()).is_retryable());
    }

    #[test]
    fn test_update_labels() {
        let err = UpdateError::ChecksumMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.as_label(), "update_checksum_mismatch");
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected aa, got bb"
        );
    }
}
