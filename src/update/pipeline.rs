//! # UpdatePipeline: stage → verify → install → repoint → prune.
//!
//! ## Filesystem layout (under `base_dir`)
//! ```text
//! updates/<version>.partial     download in progress (discardable)
//! updates/<version>             downloaded artifact (rename is the commit point)
//! releases/.<version>.tmp/      release being assembled (invisible to pruning)
//! releases/<version>/<binary>   installed release, executable, never mutated
//! .current.tmp                  new pointer being prepared
//! current                       symlink to the active release's binary
//! ```
//!
//! ## Rules
//! - Every commit is a `rename` within one directory; `current` always resolves
//!   to a complete release or does not exist.
//! - A failure at any stage leaves `current` and existing releases untouched
//!   and removes what the stage created.
//! - Pruning orders releases by semantic version (unparsable names first) and
//!   never removes the release `current` points to.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::UpdateError;
use crate::update::manifest::{Manifest, parse_version};

/// Upper bound for one artifact download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Where the pipeline currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UpdateStage {
    #[default]
    Idle,
    Downloading,
    Verifying,
    Installing,
    Restarting,
}

impl UpdateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStage::Idle => "idle",
            UpdateStage::Downloading => "downloading",
            UpdateStage::Verifying => "verifying",
            UpdateStage::Installing => "installing",
            UpdateStage::Restarting => "restarting",
        }
    }
}

/// Paths of the on-disk release layout.
#[derive(Clone, Debug)]
pub struct ReleaseLayout {
    base: PathBuf,
}

impl ReleaseLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.base.join("updates")
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.base.join("releases")
    }

    pub fn staging_path(&self, version: &str) -> PathBuf {
        self.updates_dir().join(format!("{version}.partial"))
    }

    pub fn artifact_path(&self, version: &str) -> PathBuf {
        self.updates_dir().join(version)
    }

    pub fn release_dir(&self, version: &str) -> PathBuf {
        self.releases_dir().join(version)
    }

    pub fn current_link(&self) -> PathBuf {
        self.base.join("current")
    }

    fn current_tmp(&self) -> PathBuf {
        self.base.join(".current.tmp")
    }

    /// Binary the `current` pointer resolves to.
    pub async fn current_target(&self) -> Option<PathBuf> {
        fs::read_link(self.current_link()).await.ok()
    }

    /// Name of the release directory `current` points into.
    pub async fn current_release(&self) -> Option<String> {
        let target = self.current_target().await?;
        target
            .parent()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

/// Decides whether `candidate` should replace `current`.
///
/// Newer always qualifies; older only with `allow_downgrade`; equal never.
pub fn version_gate(current: &str, candidate: &str, allow_downgrade: bool) -> Result<bool, UpdateError> {
    if candidate.trim().is_empty() {
        return Ok(false);
    }
    let cur = parse_version(current)?;
    let cand = parse_version(candidate)?;
    Ok(cand > cur || (allow_downgrade && cand < cur))
}

/// Sorts release names oldest first: unparsable names (by name), then by version.
pub fn sort_releases(names: &mut [String]) {
    names.sort_by_cached_key(|n| (parse_version(n).ok(), n.clone()));
}

/// Hex SHA-256 of a file.
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Executes the filesystem side of one update.
pub struct UpdatePipeline {
    layout: ReleaseLayout,
    binary_name: String,
    keep_releases: usize,
    client: reqwest::Client,
    stage: Arc<Mutex<UpdateStage>>,
}

impl UpdatePipeline {
    pub fn new(
        layout: ReleaseLayout,
        binary_name: impl Into<String>,
        keep_releases: usize,
        client: reqwest::Client,
    ) -> Self {
        Self {
            layout,
            binary_name: binary_name.into(),
            keep_releases: keep_releases.max(1),
            client,
            stage: Arc::new(Mutex::new(UpdateStage::Idle)),
        }
    }

    /// Reports stage changes into a shared cell.
    pub fn with_stage(mut self, stage: Arc<Mutex<UpdateStage>>) -> Self {
        self.stage = stage;
        self
    }

    pub fn layout(&self) -> &ReleaseLayout {
        &self.layout
    }

    /// Runs download → verify → install → prune for an accepted manifest.
    ///
    /// Returns the path of the newly active binary.
    pub async fn apply(&self, manifest: &Manifest, token: &CancellationToken) -> Result<PathBuf, UpdateError> {
        let res = self.run_stages(manifest, token).await;
        self.set_stage(UpdateStage::Idle);
        res
    }

    async fn run_stages(&self, manifest: &Manifest, token: &CancellationToken) -> Result<PathBuf, UpdateError> {
        self.set_stage(UpdateStage::Downloading);
        let artifact = self.download(manifest, token).await?;

        self.set_stage(UpdateStage::Verifying);
        self.verify(&artifact, manifest.checksum()).await?;

        if token.is_cancelled() {
            return Err(UpdateError::Canceled);
        }
        self.set_stage(UpdateStage::Installing);
        let binary = self.install(&artifact, &manifest.version).await?;

        match self.prune().await {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(removed = ?removed, keep = self.keep_releases, "pruned old releases");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to prune releases"),
        }
        Ok(binary)
    }

    /// Streams the artifact to `updates/<v>.partial`, then renames it to `updates/<v>`.
    pub async fn download(&self, manifest: &Manifest, token: &CancellationToken) -> Result<PathBuf, UpdateError> {
        if manifest.url.trim().is_empty() {
            return Err(UpdateError::DownloadFailed("manifest has no artifact url".into()));
        }
        let dir = self.layout.updates_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| UpdateError::DownloadFailed(format!("create {}: {e}", dir.display())))?;

        let staging = self.layout.staging_path(&manifest.version);
        tracing::info!(url = %manifest.url, version = %manifest.version, "downloading update");

        let res = tokio::select! {
            biased;
            _ = token.cancelled() => Err(UpdateError::Canceled),
            r = self.fetch_to(&manifest.url, &staging) => r,
        };
        let written = match res {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            }
        };
        if let Some(expected) = manifest.size.filter(|s| *s > 0 && *s != written) {
            let _ = fs::remove_file(&staging).await;
            return Err(UpdateError::DownloadFailed(format!(
                "size mismatch: expected {expected} bytes, got {written}"
            )));
        }

        let artifact = self.layout.artifact_path(&manifest.version);
        fs::rename(&staging, &artifact)
            .await
            .map_err(|e| UpdateError::DownloadFailed(format!("finalize download: {e}")))?;
        tracing::debug!(path = %artifact.display(), bytes = written, "artifact staged");
        Ok(artifact)
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, UpdateError> {
        let failed = |e: &dyn std::fmt::Display| UpdateError::DownloadFailed(e.to_string());

        let resp = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| failed(&e))?
            .error_for_status()
            .map_err(|e| failed(&e))?;

        let mut file = fs::File::create(dest).await.map_err(|e| failed(&e))?;
        let mut body = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| failed(&e))?;
            file.write_all(&chunk).await.map_err(|e| failed(&e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| failed(&e))?;
        file.sync_all().await.map_err(|e| failed(&e))?;
        Ok(written)
    }

    /// Checks the artifact against `expected`; `None` skips verification.
    ///
    /// A mismatching artifact is deleted.
    pub async fn verify(&self, artifact: &Path, expected: Option<&str>) -> Result<(), UpdateError> {
        let Some(expected) = expected else {
            tracing::info!(path = %artifact.display(), "no checksum provided, verification skipped");
            return Ok(());
        };
        let actual = sha256_file(artifact).await?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            let _ = fs::remove_file(artifact).await;
            return Err(UpdateError::ChecksumMismatch {
                expected: expected.trim().to_string(),
                actual,
            });
        }
        tracing::info!(sha256 = %actual, "checksum verified");
        Ok(())
    }

    /// Installs the artifact as `releases/<version>/<binary>` and repoints `current`.
    pub async fn install(&self, artifact: &Path, version: &str) -> Result<PathBuf, UpdateError> {
        let failed = |what: &str, e: io::Error| UpdateError::InstallFailed(format!("{what}: {e}"));

        if self.layout.current_release().await.as_deref() == Some(version) {
            return Err(UpdateError::InstallFailed(format!("release {version} is active")));
        }

        let releases = self.layout.releases_dir();
        fs::create_dir_all(&releases)
            .await
            .map_err(|e| failed("create releases dir", e))?;

        let tmp_dir = releases.join(format!(".{version}.tmp"));
        let _ = fs::remove_dir_all(&tmp_dir).await;
        fs::create_dir_all(&tmp_dir)
            .await
            .map_err(|e| failed("create release dir", e))?;
        if let Err(e) = copy_executable(artifact, &tmp_dir.join(&self.binary_name)).await {
            let _ = fs::remove_dir_all(&tmp_dir).await;
            return Err(failed("copy artifact", e));
        }

        let release_dir = self.layout.release_dir(version);
        if fs::try_exists(&release_dir).await.unwrap_or(false) {
            tracing::warn!(version, "replacing inactive release directory");
            let _ = fs::remove_dir_all(&release_dir).await;
        }
        if let Err(e) = fs::rename(&tmp_dir, &release_dir).await {
            let _ = fs::remove_dir_all(&tmp_dir).await;
            return Err(failed("commit release dir", e));
        }

        let binary = release_dir.join(&self.binary_name);
        if let Err(e) = self.repoint(&binary).await {
            let _ = fs::remove_dir_all(&release_dir).await;
            return Err(e);
        }
        tracing::info!(version, binary = %binary.display(), "release installed");
        Ok(binary)
    }

    /// Atomically replaces `current` with a link to `binary`.
    async fn repoint(&self, binary: &Path) -> Result<(), UpdateError> {
        let current = self.layout.current_link();
        let tmp = self.layout.current_tmp();
        let _ = fs::remove_file(&tmp).await;

        symlink(binary, &tmp)
            .await
            .map_err(|e| UpdateError::InstallFailed(format!("create tmp symlink: {e}")))?;
        if let Err(e) = fs::rename(&tmp, &current).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(UpdateError::InstallFailed(format!("rename symlink: {e}")));
        }
        Ok(())
    }

    /// Removes the oldest releases beyond `keep_releases`. Returns the removed names.
    pub async fn prune(&self) -> Result<Vec<String>, UpdateError> {
        let dir = self.layout.releases_dir();
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            names.push(name);
        }
        if names.len() <= self.keep_releases {
            return Ok(Vec::new());
        }

        sort_releases(&mut names);
        let current = self.layout.current_release().await;
        let mut excess = names.len() - self.keep_releases;
        let mut removed = Vec::new();

        for name in names {
            if excess == 0 {
                break;
            }
            if current.as_deref() == Some(name.as_str()) {
                continue;
            }
            match fs::remove_dir_all(dir.join(&name)).await {
                Ok(()) => {
                    excess -= 1;
                    removed.push(name);
                }
                Err(e) => tracing::warn!(release = %name, error = %e, "failed to remove release"),
            }
        }
        Ok(removed)
    }

    fn set_stage(&self, stage: UpdateStage) {
        *self.stage.lock() = stage;
        tracing::debug!(stage = stage.as_str(), "update stage");
    }
}

async fn copy_executable(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dst, std::fs::Permissions::from_mode(0o755)).await?;
    }
    fs::File::open(dst).await?.sync_all().await
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink_file(target, link).await
}
