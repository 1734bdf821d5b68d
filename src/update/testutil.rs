//! Test helpers: an in-process artifact server and release seeding.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{Router, routing::get};
use tokio::fs;
use tokio::task::JoinHandle;

use crate::update::pipeline::ReleaseLayout;

/// Serves one artifact at `/agent` and counts requests.
pub(crate) struct ArtifactServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl ArtifactServer {
    pub(crate) async fn start(body: Vec<u8>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let body = Arc::new(body);
        let counter = hits.clone();
        let app = Router::new().route(
            "/agent",
            get(move || {
                let counter = counter.clone();
                let body = body.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    body.as_ref().clone()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, hits, handle }
    }

    pub(crate) fn base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn url(&self) -> String {
        format!("{}/agent", self.base())
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for ArtifactServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Creates `releases/<version>/relayvisor`, optionally pointing `current` at it.
pub(crate) async fn seed_release(layout: &ReleaseLayout, version: &str, bytes: &[u8], make_current: bool) {
    let dir = layout.release_dir(version);
    fs::create_dir_all(&dir).await.unwrap();
    let bin = dir.join("relayvisor");
    fs::write(&bin, bytes).await.unwrap();
    if make_current {
        let link = layout.current_link();
        let _ = fs::remove_file(&link).await;
        fs::symlink(&bin, &link).await.unwrap();
    }
}
