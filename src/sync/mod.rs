//! Repository-wide operations guarded by the sync gate
//!
//! Only sync and checkout-from-remote take the gate. Reads and writes of
//! single files never do.

pub mod gate;

pub use gate::{SyncGate, SyncGuard};

use crate::error::ReposerveResult;
use crate::repository::Repository;
use crate::vcs::{SyncRequest, VersionControl};
use std::sync::Arc;
use tracing::info;

/// Result of a gated operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The operation ran; carries the backend's transcript
    Completed(String),
    /// Another operation holds the repository's gate
    InProgress,
    /// Dry run: what would have been done
    DryRun(String),
}

/// Runs gated repository-wide operations
pub struct RepoOperations {
    gate: SyncGate,
    vcs: Arc<dyn VersionControl>,
}

impl RepoOperations {
    pub fn new(gate: SyncGate, vcs: Arc<dyn VersionControl>) -> Self {
        Self { gate, vcs }
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    /// Commit, pull and push `repo`
    pub async fn sync(
        &self,
        repo: &Repository,
        request: &SyncRequest,
        dry_run: bool,
    ) -> ReposerveResult<SyncOutcome> {
        let Some(_guard) = self.gate.try_enter(repo.name()) else {
            info!("Sync in progress: {}", repo.name());
            return Ok(SyncOutcome::InProgress);
        };
        if dry_run {
            return Ok(SyncOutcome::DryRun(format!(
                "sync {} with branch {}",
                repo.name(),
                request.branch
            )));
        }

        info!("Sync {} ({})", repo.name(), self.vcs.backend_name());
        let transcript = self.vcs.sync(repo.root(), request).await?;
        Ok(SyncOutcome::Completed(transcript))
    }

    /// Replace `path` with its state on the remote `branch`
    pub async fn checkout(
        &self,
        repo: &Repository,
        branch: &str,
        path: &str,
        dry_run: bool,
    ) -> ReposerveResult<SyncOutcome> {
        let Some(_guard) = self.gate.try_enter(repo.name()) else {
            info!("Sync in progress: {}", repo.name());
            return Ok(SyncOutcome::InProgress);
        };
        if dry_run {
            return Ok(SyncOutcome::DryRun(format!(
                "checkout {} from branch {} in {}",
                path,
                branch,
                repo.name()
            )));
        }

        info!("Checkout {} in {} from {}", path, repo.name(), branch);
        let transcript = self
            .vcs
            .checkout_from_remote(repo.root(), branch, path)
            .await?;
        Ok(SyncOutcome::Completed(transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReposerveError;
    use crate::repository::RepoLayout;
    use crate::vcs::{Author, CommitOutcome, DiffTarget, VersionEntry};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Backend whose sync blocks until released
    #[derive(Default)]
    struct BlockingVcs {
        started: Notify,
        release: Notify,
        syncs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl VersionControl for BlockingVcs {
        async fn current_version(&self, _: &Path, _: &str) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn content_at(&self, _: &Path, _: &str, _: &str) -> ReposerveResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn commit(
            &self,
            _: &Path,
            _: &str,
            _: &Author,
            _: &str,
        ) -> ReposerveResult<CommitOutcome> {
            Ok(CommitOutcome::NothingToCommit)
        }
        async fn history(&self, _: &Path, _: &str) -> ReposerveResult<Vec<VersionEntry>> {
            Ok(Vec::new())
        }
        async fn sync(&self, _: &Path, _: &SyncRequest) -> ReposerveResult<String> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ReposerveError::backend("git push", "rejected"));
            }
            self.started.notify_one();
            self.release.notified().await;
            Ok("done".to_string())
        }
        async fn checkout_from_remote(&self, _: &Path, _: &str, _: &str) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn status(&self, _: &Path) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn log(&self, _: &Path, _: usize) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn commit_all(&self, _: &Path, _: &Author, _: &str) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn diff(&self, _: &Path, _: &DiffTarget) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn branches(&self, _: &Path) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn remote_url(&self, _: &Path) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn graph(&self, _: &Path, _: usize) -> ReposerveResult<String> {
            Ok(String::new())
        }
        async fn clone_repository(&self, _: &Path, _: &str, _: &str) -> ReposerveResult<String> {
            Ok(String::new())
        }
        fn backend_name(&self) -> &'static str {
            "blocking"
        }
    }

    fn repo() -> Repository {
        Repository::new("repoA", "/srv/repoA", Arc::new(RepoLayout::default()))
    }

    #[tokio::test]
    async fn concurrent_sync_runs_once() {
        let vcs = Arc::new(BlockingVcs::default());
        let ops = Arc::new(RepoOperations::new(SyncGate::new(), vcs.clone()));

        let first = {
            let ops = ops.clone();
            tokio::spawn(async move { ops.sync(&repo(), &SyncRequest::default(), false).await })
        };
        vcs.started.notified().await;

        let second = ops
            .sync(&repo(), &SyncRequest::default(), false)
            .await
            .unwrap();
        assert_eq!(second, SyncOutcome::InProgress);

        let checkout = ops.checkout(&repo(), "main", "a.js", false).await.unwrap();
        assert_eq!(checkout, SyncOutcome::InProgress);

        vcs.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, SyncOutcome::Completed("done".to_string()));
        assert_eq!(vcs.syncs.load(Ordering::SeqCst), 1);
        assert!(!ops.gate().is_held("repoA"));
    }

    #[tokio::test]
    async fn failed_sync_releases_gate() {
        let vcs = Arc::new(BlockingVcs {
            fail: true,
            ..Default::default()
        });
        let ops = RepoOperations::new(SyncGate::new(), vcs);

        assert!(ops
            .sync(&repo(), &SyncRequest::default(), false)
            .await
            .is_err());
        assert!(!ops.gate().is_held("repoA"));
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let vcs = Arc::new(BlockingVcs::default());
        let ops = RepoOperations::new(SyncGate::new(), vcs.clone());

        let outcome = ops
            .sync(&repo(), &SyncRequest::default(), true)
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::DryRun(_)));
        assert_eq!(vcs.syncs.load(Ordering::SeqCst), 0);
    }
}
