//! # UpdateEngine: the periodic self-update loop.
//!
//! ## Architecture
//! ```text
//! run(token)
//!   ├─ disabled → return
//!   ├─ sleep(startup jitter, 1–10s)
//!   └─ loop {
//!        check_and_maybe_update(token)          (one cycle, never concurrent)
//!          ├─ ManifestResolver::resolve ─► None            → NoManifest
//!          ├─ Manifest::check (channel, platform) ─► Err   → Incompatible
//!          ├─ version_gate ─► false                        → UpToDate (no download)
//!          └─ UpdatePipeline::apply ─► binary ─► schedule restart → Installed
//!        log outcome or error (never fatal)
//!        sleep(interval ± 10%)
//!      }
//! ```
//!
//! ## Rules
//! - The configuration is an immutable snapshot; [`UpdateEngine::apply_config`]
//!   swaps it whole. A running cycle keeps the snapshot it started with.
//! - Cycles are serialized by a mutex, so the manual trigger and the periodic
//!   loop never overlap.
//! - Only global cancellation stops the loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::fs;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::UpdaterConfig;
use crate::error::UpdateError;
use crate::policies::Jitter;
use crate::update::manifest::{Incompatibility, Platform};
use crate::update::messaging::Messenger;
use crate::update::pipeline::{ReleaseLayout, UpdatePipeline, UpdateStage, version_gate};
use crate::update::resolver::ManifestResolver;
use crate::update::restart::{Restarter, ServiceRestarter};

/// Result of one update cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Updates are disabled in the current configuration.
    Disabled,
    /// No candidate was offered.
    NoManifest,
    /// The candidate targets another channel or platform.
    Incompatible(Incompatibility),
    /// The candidate does not pass the version gate.
    UpToDate { current: String, candidate: String },
    /// A new release is active; a restart has been scheduled.
    Installed { version: String, binary: PathBuf },
}

/// Drives manifest resolution and the update pipeline on a jittered schedule.
pub struct UpdateEngine {
    current_version: String,
    cfg: RwLock<Arc<UpdaterConfig>>,
    resolver: ManifestResolver,
    restarter: Arc<dyn Restarter>,
    client: reqwest::Client,
    host: Platform,
    cycle: tokio::sync::Mutex<()>,
    stage: Arc<Mutex<UpdateStage>>,
    startup_jitter: Jitter,
    interval_jitter: Jitter,
}

impl UpdateEngine {
    /// Creates an engine for the running `current_version`.
    pub fn new(current_version: impl Into<String>, cfg: UpdaterConfig) -> Self {
        let current_version = current_version.into();
        let host = Platform::host();
        Self {
            resolver: ManifestResolver::new(current_version.clone(), host.clone()),
            current_version,
            cfg: RwLock::new(Arc::new(cfg.normalized())),
            restarter: Arc::new(ServiceRestarter),
            client: reqwest::Client::new(),
            host,
            cycle: tokio::sync::Mutex::new(()),
            stage: Arc::new(Mutex::new(UpdateStage::Idle)),
            startup_jitter: Jitter::STARTUP,
            interval_jitter: Jitter::INTERVAL,
        }
    }

    /// Replaces the restart strategy.
    pub fn with_restarter(mut self, restarter: Arc<dyn Restarter>) -> Self {
        self.restarter = restarter;
        self
    }

    /// Sets the messaging collaborator used for update checks.
    pub fn with_messenger(self, messenger: Arc<dyn Messenger>) -> Self {
        self.resolver.set_messenger(Some(messenger));
        self
    }

    /// Overrides the schedule jitter (startup delay, interval spread).
    pub fn with_jitter(mut self, startup: Jitter, interval: Jitter) -> Self {
        self.startup_jitter = startup;
        self.interval_jitter = interval;
        self
    }

    /// Resolver the messaging transport delivers replies to.
    pub fn resolver(&self) -> &ManifestResolver {
        &self.resolver
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<UpdaterConfig> {
        self.cfg.read().clone()
    }

    /// Replaces the configuration snapshot (empty fields take defaults).
    pub fn apply_config(&self, cfg: UpdaterConfig) {
        let cfg = Arc::new(cfg.normalized());
        tracing::info!(
            enabled = cfg.enabled,
            interval = ?cfg.interval,
            channel = %cfg.channel,
            base_dir = %cfg.base_dir.display(),
            "updater config applied"
        );
        *self.cfg.write() = cfg;
    }

    /// Stage of the cycle in flight.
    pub fn stage(&self) -> UpdateStage {
        *self.stage.lock()
    }

    /// Logs the running version and the release `current` resolves to, and
    /// discards downloads interrupted by a previous run.
    ///
    /// Returns the active release name, if any.
    pub async fn handle_startup(&self) -> Option<String> {
        let cfg = self.config();
        let layout = ReleaseLayout::new(&cfg.base_dir);

        if let Ok(mut entries) = fs::read_dir(layout.updates_dir()).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "partial") {
                    match fs::remove_file(&path).await {
                        Ok(()) => tracing::info!(path = %path.display(), "removed stale partial download"),
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial download"),
                    }
                }
            }
        }

        let release = layout.current_release().await;
        tracing::info!(
            version = %self.current_version,
            release = release.as_deref().unwrap_or("-"),
            "updater startup check complete"
        );
        release
    }

    /// Periodic loop; returns when `token` is cancelled or updates are disabled.
    pub async fn run(&self, token: CancellationToken) {
        if !self.config().enabled {
            tracing::info!("updater disabled, periodic loop not started");
            return;
        }

        let first = self.startup_jitter.apply(Duration::ZERO);
        if !sleep_or_cancel(first, &token).await {
            return;
        }

        loop {
            match self.check_and_maybe_update(&token).await {
                Ok(outcome) => tracing::info!(outcome = ?outcome, "update cycle complete"),
                Err(UpdateError::Canceled) => break,
                Err(e) => tracing::error!(error = %e, label = e.as_label(), "update cycle failed"),
            }

            let next = self.interval_jitter.apply(self.config().interval);
            tracing::debug!(next = ?next, "next update check scheduled");
            if !sleep_or_cancel(next, &token).await {
                break;
            }
        }
        tracing::info!("updater stopped");
    }

    /// Runs one update cycle now.
    pub async fn check_and_maybe_update(&self, token: &CancellationToken) -> Result<CycleOutcome, UpdateError> {
        let _cycle = self.cycle.lock().await;
        let cfg = self.config();
        if !cfg.enabled {
            return Ok(CycleOutcome::Disabled);
        }

        let Some(manifest) = self.resolver.resolve(&cfg, token).await? else {
            return Ok(CycleOutcome::NoManifest);
        };

        if let Err(why) = manifest.check(&cfg.channel, &self.host) {
            tracing::info!(version = %manifest.version, reason = %why, "skipping incompatible manifest");
            return Ok(CycleOutcome::Incompatible(why));
        }

        if !version_gate(&self.current_version, &manifest.version, cfg.allow_downgrade)? {
            tracing::info!(current = %self.current_version, candidate = %manifest.version, "no update needed");
            return Ok(CycleOutcome::UpToDate {
                current: self.current_version.clone(),
                candidate: manifest.version,
            });
        }

        let pipeline = UpdatePipeline::new(
            ReleaseLayout::new(&cfg.base_dir),
            cfg.binary_name.clone(),
            cfg.keep_releases,
            self.client.clone(),
        )
        .with_stage(self.stage.clone());

        let binary = pipeline.apply(&manifest, token).await?;
        self.schedule_restart(&cfg, token);
        Ok(CycleOutcome::Installed {
            version: manifest.version,
            binary,
        })
    }

    fn schedule_restart(&self, cfg: &UpdaterConfig, token: &CancellationToken) {
        *self.stage.lock() = UpdateStage::Restarting;
        tracing::info!(service = %cfg.service_name, delay = ?cfg.restart_delay, "scheduling restart");

        let restarter = self.restarter.clone();
        let stage = self.stage.clone();
        let service = cfg.service_name.clone();
        let delay = cfg.restart_delay;
        let timeout = cfg.health_timeout;
        let token = token.clone();
        tokio::spawn(async move {
            if sleep_or_cancel(delay, &token).await {
                restarter.restart(&service, timeout).await;
            } else {
                tracing::info!("restart abandoned, shutting down");
            }
            *stage.lock() = UpdateStage::Idle;
        });
    }
}

/// Sleeps for `delay`; returns `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = time::sleep(delay) => true,
        _ = token.cancelled() => false,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::update::manifest::UpdateCheckResponse;
    use crate::update::messaging::MessagingError;
    use crate::update::pipeline::sha256_file;
    use crate::update::testutil::{ArtifactServer, seed_release};

    const BUILD: &[u8] = b"relayvisor 1.2.0 build";

    /// Connected transport that forwards emitted requests to the test.
    struct Scripted {
        tx: mpsc::UnboundedSender<serde_json::Value>,
    }

    #[async_trait]
    impl Messenger for Scripted {
        fn is_connected(&self) -> bool {
            true
        }

        async fn emit(&self, _event: &str, payload: serde_json::Value) -> Result<(), MessagingError> {
            self.tx.send(payload).map_err(|e| e.to_string().into())
        }
    }

    #[derive(Default)]
    struct CountingRestarter(AtomicUsize);

    #[async_trait]
    impl Restarter for CountingRestarter {
        async fn restart(&self, _service: &str, _timeout: Duration) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        engine: Arc<UpdateEngine>,
        restarter: Arc<CountingRestarter>,
        dir: tempfile::TempDir,
    }

    /// Engine at 1.1.0 with release 1.1.0 active; replies with `reply` to every request.
    async fn fixture(reply: UpdateCheckResponse, tweak: impl FnOnce(&mut UpdaterConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = UpdaterConfig {
            base_dir: dir.path().to_path_buf(),
            restart_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
            ..UpdaterConfig::default()
        };
        tweak(&mut cfg);
        seed_release(&ReleaseLayout::new(dir.path()), "1.1.0", b"relayvisor 1.1.0", true).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let restarter = Arc::new(CountingRestarter::default());
        let engine = Arc::new(
            UpdateEngine::new("1.1.0", cfg)
                .with_messenger(Arc::new(Scripted { tx }))
                .with_restarter(restarter.clone())
                .with_jitter(Jitter::None, Jitter::None),
        );

        let responder = Arc::downgrade(&engine);
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let Some(engine) = responder.upgrade() else { break };
                let mut resp = reply.clone();
                resp.request_id = req["request_id"].as_str().map(String::from);
                engine.resolver().deliver_response(resp);
            }
        });

        Fixture { engine, restarter, dir }
    }

    fn offer(version: &str, url: String, checksum: Option<String>) -> UpdateCheckResponse {
        UpdateCheckResponse {
            new_version: version.into(),
            update_available: true,
            download_url: Some(url),
            checksum,
            request_id: None,
        }
    }

    async fn build_sha() -> String {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("build");
        fs::write(&p, BUILD).await.unwrap();
        sha256_file(&p).await.unwrap()
    }

    #[tokio::test]
    async fn test_installs_newer_release_with_valid_checksum() {
        let server = ArtifactServer::start(BUILD.to_vec()).await;
        let sha = build_sha().await;
        let f = fixture(offer("1.2.0", server.url(), Some(sha.clone())), |_| {}).await;

        let outcome = f.engine.check_and_maybe_update(&CancellationToken::new()).await.unwrap();
        let layout = ReleaseLayout::new(f.dir.path());
        let expected_bin = layout.release_dir("1.2.0").join("relayvisor");
        assert_eq!(
            outcome,
            CycleOutcome::Installed {
                version: "1.2.0".into(),
                binary: expected_bin.clone(),
            }
        );
        assert_eq!(layout.current_target().await, Some(expected_bin));
        assert_eq!(sha256_file(&layout.current_link()).await.unwrap(), sha);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.restarter.0.load(Ordering::SeqCst), 1);
        assert_eq!(f.engine.stage(), UpdateStage::Idle);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_keeps_current() {
        let server = ArtifactServer::start(BUILD.to_vec()).await;
        let f = fixture(offer("1.2.0", server.url(), Some("00".repeat(32))), |_| {}).await;

        let err = f
            .engine
            .check_and_maybe_update(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::ChecksumMismatch { .. }));

        let layout = ReleaseLayout::new(f.dir.path());
        assert_eq!(layout.current_release().await.as_deref(), Some("1.1.0"));
        assert!(!fs::try_exists(layout.release_dir("1.2.0")).await.unwrap());
        assert!(!fs::try_exists(layout.artifact_path("1.2.0")).await.unwrap());
        assert_eq!(f.restarter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_downgrade_refused_without_download() {
        let server = ArtifactServer::start(BUILD.to_vec()).await;
        let f = fixture(offer("1.0.0", server.url(), None), |_| {}).await;

        let outcome = f.engine.check_and_maybe_update(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::UpToDate {
                current: "1.1.0".into(),
                candidate: "1.0.0".into(),
            }
        );
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn test_downgrade_allowed_when_configured() {
        let server = ArtifactServer::start(BUILD.to_vec()).await;
        let f = fixture(offer("1.0.0", server.url(), None), |c| c.allow_downgrade = true).await;

        let outcome = f.engine.check_and_maybe_update(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Installed { ref version, .. } if version == "1.0.0"));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_install_prunes_to_keep_releases() {
        let server = ArtifactServer::start(BUILD.to_vec()).await;
        let f = fixture(offer("1.2.0", server.url(), None), |c| c.keep_releases = 2).await;
        let layout = ReleaseLayout::new(f.dir.path());
        for v in ["0.9.0", "1.0.0"] {
            seed_release(&layout, v, b"old", false).await;
        }

        f.engine.check_and_maybe_update(&CancellationToken::new()).await.unwrap();

        let mut names = Vec::new();
        let mut rd = fs::read_dir(layout.releases_dir()).await.unwrap();
        while let Some(e) = rd.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, ["1.1.0", "1.2.0"]);
    }

    #[tokio::test]
    async fn test_disabled_and_no_update() {
        let f = fixture(UpdateCheckResponse::default(), |_| {}).await;
        let token = CancellationToken::new();
        assert_eq!(
            f.engine.check_and_maybe_update(&token).await.unwrap(),
            CycleOutcome::NoManifest
        );

        f.engine.apply_config(UpdaterConfig {
            enabled: false,
            base_dir: f.dir.path().to_path_buf(),
            ..UpdaterConfig::default()
        });
        assert_eq!(
            f.engine.check_and_maybe_update(&token).await.unwrap(),
            CycleOutcome::Disabled
        );
        // Disabled engines return from the loop immediately.
        f.engine.run(token).await;
    }

    #[tokio::test]
    async fn test_startup_reports_release_and_discards_partials() {
        let f = fixture(UpdateCheckResponse::default(), |_| {}).await;
        let layout = ReleaseLayout::new(f.dir.path());
        fs::create_dir_all(layout.updates_dir()).await.unwrap();
        fs::write(layout.staging_path("1.2.0"), b"half").await.unwrap();

        assert_eq!(f.engine.handle_startup().await.as_deref(), Some("1.1.0"));
        assert!(!fs::try_exists(layout.staging_path("1.2.0")).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture(UpdateCheckResponse::default(), |c| c.interval = Duration::from_millis(20)).await;
        let token = CancellationToken::new();
        let engine = f.engine.clone();
        let t = token.clone();
        let join = tokio::spawn(async move { engine.run(t).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), join).await.unwrap().unwrap();
    }
}
