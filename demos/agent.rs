//! Edge agent wiring: stream supervision and self-update under one shutdown signal.
//!
//! ```text
//! RELAYVISOR_CONFIG=agent.json RUST_LOG=relayvisor=debug cargo run --example agent
//! ```
//!
//! `agent.json` (every section optional):
//! ```json
//! {
//!   "stream":     { "max_concurrency": 2 },
//!   "transcoder": { "sink": { "host": "rtmp.local" } },
//!   "updater":    { "enabled": false },
//!   "cameras":    [ { "id": "cam1", "source_url": "rtsp://10.0.0.5:554/h264", "enabled": true } ]
//! }
//! ```

use std::sync::Arc;

use relayvisor::{
    CameraSpec, FfmpegTranscoder, StreamConfig, StreamSupervisor, TranscoderConfig, UpdateEngine, UpdaterConfig,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentConfig {
    stream: StreamConfig,
    transcoder: TranscoderConfig,
    updater: UpdaterConfig,
    cameras: Vec<CameraSpec>,
}

fn load_config() -> Result<AgentConfig, Box<dyn std::error::Error>> {
    match std::env::var("RELAYVISOR_CONFIG") {
        Ok(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        Err(_) => Ok(AgentConfig {
            updater: UpdaterConfig {
                enabled: false,
                ..UpdaterConfig::default()
            },
            cameras: vec![CameraSpec::new("cam1", "rtsp://127.0.0.1:8554/demo")],
            ..AgentConfig::default()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config()?;
    let token = CancellationToken::new();

    let updater = Arc::new(UpdateEngine::new(env!("CARGO_PKG_VERSION"), cfg.updater));
    updater.handle_startup().await;
    let update_loop = {
        let updater = updater.clone();
        let token = token.clone();
        tokio::spawn(async move { updater.run(token).await })
    };

    let transcoder = Arc::new(FfmpegTranscoder::new(cfg.transcoder));
    let (sup, mut events) = StreamSupervisor::new(cfg.stream, transcoder);
    sup.start(cfg.cameras).await;

    let reporter = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            match &ev.error {
                Some(err) => tracing::warn!(camera_id = %ev.camera_id, status = %ev.status, error = %err, "camera status"),
                None => tracing::info!(camera_id = %ev.camera_id, status = %ev.status, "camera status"),
            }
        }
    });

    relayvisor::shutdown_signal().await?;
    token.cancel();
    if let Err(e) = sup.stop().await {
        tracing::error!(error = %e, "stream supervisor did not drain cleanly");
    }
    let _ = update_loop.await;
    let _ = reporter.await;
    Ok(())
}
