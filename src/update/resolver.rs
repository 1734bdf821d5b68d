//! # ManifestResolver: where the next candidate build comes from.
//!
//! ## Flow
//! ```text
//! resolve(cfg, token)
//!   ├─ messenger connected ─► register waiter (uuid → oneshot)
//!   │                         emit "is_update_available" {current_version, request_id}
//!   │                         await reply ≤ request_timeout (cancellable)
//!   │                           ├─ updateAvailable → Some(Manifest)
//!   │                           └─ no update / timeout / transport gone → None
//!   │                         waiter removed on every path (drop guard)
//!   ├─ fallback_url set   ─► Some(synthesized Manifest: current version, host platform, no checksum)
//!   └─ otherwise          ─► None
//!
//! deliver_response(resp)  (called by the transport)
//!   └─ waiter with resp.request_id, else the oldest waiter ─► oneshot.send(resp)
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::UpdaterConfig;
use crate::error::UpdateError;
use crate::update::manifest::{Manifest, Platform, UpdateCheckRequest, UpdateCheckResponse};
use crate::update::messaging::{Messenger, UPDATE_CHECK_EVENT};

struct Waiter {
    id: Uuid,
    tx: oneshot::Sender<UpdateCheckResponse>,
}

/// Removes its waiter from the pending list when dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<Vec<Waiter>>,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().retain(|w| w.id != self.id);
    }
}

/// Obtains candidate manifests via the messaging collaborator or a fallback URL.
pub struct ManifestResolver {
    current_version: String,
    host: Platform,
    messenger: RwLock<Option<Arc<dyn Messenger>>>,
    pending: Mutex<Vec<Waiter>>,
}

impl ManifestResolver {
    pub fn new(current_version: impl Into<String>, host: Platform) -> Self {
        Self {
            current_version: current_version.into(),
            host,
            messenger: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Installs (or clears) the messaging collaborator.
    pub fn set_messenger(&self, messenger: Option<Arc<dyn Messenger>>) {
        *self.messenger.write() = messenger;
    }

    /// Number of requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the candidate manifest for this cycle, if any.
    pub async fn resolve(
        &self,
        cfg: &UpdaterConfig,
        token: &CancellationToken,
    ) -> Result<Option<Manifest>, UpdateError> {
        let messenger = self.messenger.read().clone();
        if let Some(m) = messenger.filter(|m| m.is_connected()) {
            return self.request(m.as_ref(), cfg, token).await;
        }

        match cfg.fallback_url.as_deref() {
            Some(url) => {
                tracing::info!(url, "messaging offline, using fallback url");
                Ok(Some(Manifest {
                    version: self.current_version.clone(),
                    url: url.to_string(),
                    sha256: None,
                    size: None,
                    os: self.host.os.clone(),
                    arch: self.host.arch.clone(),
                    channel: cfg.channel.clone(),
                }))
            }
            None => {
                tracing::debug!("messaging offline and no fallback url, nothing to resolve");
                Ok(None)
            }
        }
    }

    /// Hands a reply to its waiter. Returns `false` if nobody was waiting.
    pub fn deliver_response(&self, resp: UpdateCheckResponse) -> bool {
        let wanted = resp.request_id.as_deref().and_then(|s| Uuid::parse_str(s).ok());

        let waiter = {
            let mut pending = self.pending.lock();
            let idx = match wanted {
                Some(id) => pending.iter().position(|w| w.id == id),
                None if pending.is_empty() => None,
                None => Some(0),
            };
            idx.map(|i| pending.remove(i))
        };

        match waiter {
            Some(w) => w.tx.send(resp).is_ok(),
            None => {
                tracing::warn!(request_id = ?resp.request_id, "update check response with no waiting request");
                false
            }
        }
    }

    /// Parses a raw transport payload and delivers it.
    pub fn deliver_json(&self, payload: serde_json::Value) -> Result<bool, UpdateError> {
        let resp: UpdateCheckResponse = serde_json::from_value(payload)
            .map_err(|e| UpdateError::Messaging(format!("malformed update check response: {e}")))?;
        Ok(self.deliver_response(resp))
    }

    async fn request(
        &self,
        messenger: &dyn Messenger,
        cfg: &UpdaterConfig,
        token: &CancellationToken,
    ) -> Result<Option<Manifest>, UpdateError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().push(Waiter { id, tx });
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let payload = serde_json::to_value(UpdateCheckRequest {
            current_version: self.current_version.clone(),
            request_id: id.to_string(),
        })
        .map_err(|e| UpdateError::Messaging(e.to_string()))?;

        tracing::info!(current_version = %self.current_version, request_id = %id, "checking for updates");
        if let Err(e) = messenger.emit(UPDATE_CHECK_EVENT, payload).await {
            tracing::warn!(request_id = %id, error = %e, "failed to send update check request");
            return Ok(None);
        }

        let timeout = cfg.request_timeout;
        let reply = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(UpdateError::Canceled),
            r = time::timeout(timeout, rx) => r,
        };

        match reply {
            Err(_elapsed) => {
                tracing::warn!(timeout = ?timeout, "timeout waiting for update check response");
                Ok(None)
            }
            Ok(Err(_closed)) => Ok(None),
            Ok(Ok(resp)) => Ok(self.to_manifest(resp, cfg)),
        }
    }

    fn to_manifest(&self, resp: UpdateCheckResponse, cfg: &UpdaterConfig) -> Option<Manifest> {
        if !resp.update_available || resp.new_version.trim().is_empty() {
            tracing::info!(current_version = %self.current_version, "no update available");
            return None;
        }
        tracing::info!(
            current_version = %self.current_version,
            new_version = %resp.new_version,
            "update available"
        );
        Some(Manifest {
            version: resp.new_version,
            url: resp.download_url.unwrap_or_default(),
            sha256: resp.checksum,
            size: None,
            os: self.host.os.clone(),
            arch: self.host.arch.clone(),
            channel: cfg.channel.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::update::messaging::MessagingError;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Records emitted payloads; never replies on its own.
    struct Recorder {
        connected: bool,
        tx: mpsc::UnboundedSender<serde_json::Value>,
    }

    #[async_trait]
    impl Messenger for Recorder {
        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), MessagingError> {
            assert_eq!(event, UPDATE_CHECK_EVENT);
            self.tx.send(payload).map_err(|e| e.to_string().into())
        }
    }

    fn resolver(connected: bool) -> (Arc<ManifestResolver>, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let r = Arc::new(ManifestResolver::new("1.1.0", Platform::host()));
        r.set_messenger(Some(Arc::new(Recorder { connected, tx })));
        (r, rx)
    }

    fn cfg() -> UpdaterConfig {
        UpdaterConfig {
            request_timeout: Duration::from_millis(200),
            ..UpdaterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_reply_routed_by_request_id() {
        let (r, mut rx) = resolver(true);
        let r2 = r.clone();
        tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            let id = req["request_id"].as_str().unwrap().to_string();
            assert_eq!(req["current_version"], "1.1.0");
            r2.deliver_response(UpdateCheckResponse {
                new_version: "1.2.0".into(),
                update_available: true,
                download_url: Some("http://h/agent".into()),
                checksum: Some("abc".into()),
                request_id: Some(id),
            });
        });

        let m = r.resolve(&cfg(), &CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(m.version, "1.2.0");
        assert_eq!(m.url, "http://h/agent");
        assert_eq!(m.sha256.as_deref(), Some("abc"));
        assert_eq!(m.channel, "stable");
        assert_eq!(r.pending(), 0);
    }

    #[tokio::test]
    async fn test_reply_without_id_goes_to_oldest() {
        let (r, mut rx) = resolver(true);
        let r2 = r.clone();
        tokio::spawn(async move {
            rx.recv().await.unwrap();
            let ok = r2
                .deliver_json(serde_json::json!({"newVersion": "1.1.0", "updateAvailable": false}))
                .unwrap();
            assert!(ok);
        });

        let m = r.resolve(&cfg(), &CancellationToken::new()).await.unwrap();
        assert!(m.is_none());
        assert_eq!(r.pending(), 0);
    }

    #[tokio::test]
    async fn test_timeout_clears_waiter() {
        let (r, _rx) = resolver(true);
        let m = r.resolve(&cfg(), &CancellationToken::new()).await.unwrap();
        assert!(m.is_none());
        assert_eq!(r.pending(), 0);
        assert!(!r.deliver_response(UpdateCheckResponse::default()));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let (r, _rx) = resolver(true);
        let token = CancellationToken::new();
        token.cancel();
        let err = r.resolve(&cfg(), &token).await.unwrap_err();
        assert_eq!(err.as_label(), "update_canceled");
        assert_eq!(r.pending(), 0);
    }

    /// Claims to be connected but the transport rejects every send.
    struct Dropped;

    #[async_trait]
    impl Messenger for Dropped {
        fn is_connected(&self) -> bool {
            true
        }

        async fn emit(&self, _event: &str, _payload: serde_json::Value) -> Result<(), MessagingError> {
            Err("transport disconnected".into())
        }
    }

    #[tokio::test]
    async fn test_send_failure_means_no_manifest() {
        let r = ManifestResolver::new("1.1.0", Platform::host());
        r.set_messenger(Some(Arc::new(Dropped)));

        let m = r.resolve(&cfg(), &CancellationToken::new()).await.unwrap();
        assert!(m.is_none());
        assert_eq!(r.pending(), 0);
    }

    #[tokio::test]
    async fn test_offline_uses_fallback() {
        let (r, _rx) = resolver(false);
        assert!(r.resolve(&cfg(), &CancellationToken::new()).await.unwrap().is_none());

        let with_fallback = UpdaterConfig {
            fallback_url: Some("https://updates.example/agent".into()),
            ..cfg()
        };
        let m = r
            .resolve(&with_fallback, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.version, "1.1.0");
        assert_eq!(m.sha256, None);
        assert_eq!(m.os, Platform::host().os);
    }
}
