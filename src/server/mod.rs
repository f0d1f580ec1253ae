//! HTTP surface
//!
//! ```text
//! /
//! ├── /_tmp/{name}        - expiring blob store (GET, PUT)
//! ├── /_webhook/register  - long-poll for a repository's next webhook
//! ├── /_webhook/signal    - deliver a webhook payload (PUT, POST)
//! ├── /_git/{operation}   - sync, checkout, commit, diff, status, log, ...
//! ├── /_meta/exit         - graceful shutdown
//! └── /{repo}/{path}      - files: GET, PUT, DELETE, MKCOL, OPTIONS
//! ```

mod control;
mod files;
mod response;
mod router;

pub use router::build_router;

use crate::cache::{Archiver, BundleBuilder, DerivedCache};
use crate::config::Config;
use crate::error::{ReposerveError, ReposerveResult};
use crate::files::FileService;
use crate::relay::{TempStore, WebhookRelay};
use crate::repository::RepoLayout;
use crate::sync::{RepoOperations, SyncGate};
use crate::vcs::VersionControl;
use crate::write::WritePipeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Shared services behind every handler
#[derive(Clone)]
pub struct AppState {
    root_dir: PathBuf,
    layout: Arc<RepoLayout>,
    vcs: Arc<dyn VersionControl>,
    files: Arc<FileService>,
    writes: Arc<WritePipeline>,
    operations: Arc<RepoOperations>,
    tmp: TempStore,
    webhooks: WebhookRelay,
    shutdown: Arc<Notify>,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(config: &Config, vcs: Arc<dyn VersionControl>, archiver: Arc<dyn Archiver>) -> Self {
        let cache = Arc::new(DerivedCache::new(vcs.clone()));
        let bundles = Arc::new(BundleBuilder::new(cache.clone(), archiver));
        let files = FileService::new(vcs.clone(), cache.clone(), bundles.clone());
        let writes = WritePipeline::new(vcs.clone(), cache, bundles, config.server.auto_commit);

        Self {
            root_dir: config.server.root_dir.clone(),
            layout: Arc::new(RepoLayout::from(&config.cache)),
            operations: Arc::new(RepoOperations::new(SyncGate::new(), vcs.clone())),
            vcs,
            files: Arc::new(files),
            writes: Arc::new(writes),
            tmp: TempStore::new(Duration::from_secs(config.relay.tmp_ttl_secs)),
            webhooks: WebhookRelay::new(),
            shutdown: Arc::new(Notify::new()),
            max_body_bytes: config.server.max_body_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn sync_gate(&self) -> &SyncGate {
        self.operations.gate()
    }

    pub fn webhooks(&self) -> &WebhookRelay {
        &self.webhooks
    }

    /// Ask a running server to stop accepting requests
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Serve until `/_meta/exit` or Ctrl-C
pub async fn serve(listener: TcpListener, state: AppState) -> ReposerveResult<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| ReposerveError::io("reading listener address", e))?;
    info!(
        "Server running on {} in directory {}",
        addr,
        state.root_dir.display()
    );

    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| ReposerveError::io("serving HTTP", e))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(requested: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = requested.notified() => info!("Shutdown requested"),
        _ = ctrl_c => info!("Interrupted"),
    }
}
