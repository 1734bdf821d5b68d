//! # Transcoder command construction.
//!
//! This module defines the [`Transcoder`] trait (camera → command line) and the
//! production implementation [`FfmpegTranscoder`]. Any `Fn(&CameraSpec) -> CommandLine`
//! closure is also a `Transcoder`, which is how tests substitute a shell stub.
//!
//! The argument vector is a pure function of [`TranscoderConfig`] and the
//! camera, so identical inputs always produce identical invocations.

use std::fmt;
use std::path::PathBuf;

use crate::config::{CameraSpec, TranscoderConfig};

/// Program and arguments for one transcoder launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Creates a command line from a program and its arguments.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// # Builds the command that relays one camera.
///
/// Implementations must be deterministic: the same camera yields the same command.
pub trait Transcoder: Send + Sync + 'static {
    /// Returns the command line for `camera`.
    fn command(&self, camera: &CameraSpec) -> CommandLine;
}

impl<F> Transcoder for F
where
    F: Fn(&CameraSpec) -> CommandLine + Send + Sync + 'static,
{
    fn command(&self, camera: &CameraSpec) -> CommandLine {
        self(camera)
    }
}

/// ffmpeg relay: RTSP in (TCP), H.264/AAC re-encode, FLV out to the RTMP sink.
#[derive(Clone, Debug, Default)]
pub struct FfmpegTranscoder {
    cfg: TranscoderConfig,
}

impl FfmpegTranscoder {
    /// Creates a transcoder from its configuration.
    pub fn new(cfg: TranscoderConfig) -> Self {
        Self { cfg }
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &TranscoderConfig {
        &self.cfg
    }
}

impl Transcoder for FfmpegTranscoder {
    fn command(&self, camera: &CameraSpec) -> CommandLine {
        let c = &self.cfg;
        let gop = c.gop.to_string();
        let mut args: Vec<String> = Vec::with_capacity(48);

        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| (*s).to_string()));

        push(&["-loglevel", &c.log_level]);
        push(&["-rtsp_transport", "tcp", "-rtsp_flags", "+prefer_tcp"]);
        push(&["-i", &camera.authenticated_source()]);
        push(&[
            "-c:v", &c.video_codec,
            "-preset", &c.preset,
            "-tune", &c.tune,
            "-b:v", &c.video_bitrate,
            "-maxrate", &c.max_rate,
            "-bufsize", &c.buf_size,
            "-g", &gop,
            "-keyint_min", &gop,
        ]);
        push(&["-vf", &format!("scale={}:-1,fps={}", c.scale_width, c.fps)]);
        push(&[
            "-c:a", &c.audio_codec,
            "-b:a", &c.audio_bitrate,
            "-ar", &c.audio_rate.to_string(),
        ]);
        push(&["-af", "aresample=async=1:first_pts=0"]);
        push(&["-fflags", "+discardcorrupt"]);
        for extra in c.extra_args.split_whitespace() {
            push(&[extra]);
        }
        push(&["-f", "flv", &c.sink.url_for(camera.stream_key())]);

        CommandLine {
            program: c.program.clone(),
            args,
        }
    }
}
