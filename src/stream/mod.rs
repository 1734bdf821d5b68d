//! Stream supervision: per-camera transcoder processes kept alive under a
//! shared admission gate.
//!
//! ## Contents
//! - [`Transcoder`], [`FfmpegTranscoder`], [`CommandLine`] command construction
//! - [`ProcessRunner`], [`ExitOutcome`] one OS process, start to reap
//! - [`StreamWorker`], [`WorkerSnapshot`] per-camera lifecycle record
//! - [`StreamSupervisor`] the worker set and its lifecycle
//! - [`shutdown_signal`] OS termination signals
//!
//! The supervisory loop itself (`actor`) is internal.

mod actor;
mod process;
mod shutdown;
mod supervisor;
mod transcoder;
mod worker;

pub use process::{ExitOutcome, LineLevel, ProcessRunner, classify_line};
pub use shutdown::shutdown_signal;
pub use supervisor::StreamSupervisor;
pub use transcoder::{CommandLine, FfmpegTranscoder, Transcoder};
pub use worker::{StreamWorker, WorkerSnapshot};
