//! Version control backends
//!
//! The server never tracks versions itself: every version identifier is
//! re-derived from the backend on each request.
//! - `git`: the git CLI, one process per call
//! - `memory`: in-process snapshots, for tests and git-less deployments

mod git;
mod memory;

pub use git::GitBackend;
pub use memory::MemoryVcs;

use crate::error::ReposerveResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result of a single-path commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new version was recorded
    Committed,
    /// Content matched the previous version
    NothingToCommit,
}

/// Commit author taken from the request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// One entry of a path's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub date: String,
    pub author: String,
    pub parents: Vec<String>,
    pub comment: String,
}

/// Parameters of a repository-wide sync
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub branch: String,
    pub message: String,
    pub author: Author,
}

/// What a diff compares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffTarget {
    /// Working tree against `<remote>/<branch>`
    Remote(String),
    /// A commit against its first parent
    Commit(String),
}

/// Abstract version-control interface
///
/// `repo` is always a repository root directory and `path` is relative to it.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Most recent version touching `path`, or "" if it has no history
    async fn current_version(&self, repo: &Path, path: &str) -> ReposerveResult<String>;

    /// Content of `path` as of `version`
    async fn content_at(&self, repo: &Path, path: &str, version: &str) -> ReposerveResult<Vec<u8>>;

    /// Stage and commit the single `path`
    async fn commit(
        &self,
        repo: &Path,
        path: &str,
        author: &Author,
        message: &str,
    ) -> ReposerveResult<CommitOutcome>;

    /// History of `path`, newest first
    async fn history(&self, repo: &Path, path: &str) -> ReposerveResult<Vec<VersionEntry>>;

    /// Commit local changes and exchange them with the remote
    async fn sync(&self, repo: &Path, request: &SyncRequest) -> ReposerveResult<String>;

    /// Replace `path` with its state on the remote branch
    async fn checkout_from_remote(
        &self,
        repo: &Path,
        branch: &str,
        path: &str,
    ) -> ReposerveResult<String>;

    /// Working tree status
    async fn status(&self, repo: &Path) -> ReposerveResult<String>;

    /// Recent history of the whole repository
    async fn log(&self, repo: &Path, limit: usize) -> ReposerveResult<String>;

    /// Commit every change to tracked files
    ///
    /// An unfinished merge is reported instead of committed.
    async fn commit_all(&self, repo: &Path, author: &Author, message: &str) -> ReposerveResult<String>;

    async fn diff(&self, repo: &Path, target: &DiffTarget) -> ReposerveResult<String>;

    /// Local and remote-tracking branches
    async fn branches(&self, repo: &Path) -> ReposerveResult<String>;

    /// URL of the configured remote, empty when there is none
    async fn remote_url(&self, repo: &Path) -> ReposerveResult<String>;

    /// History drawn as a graph
    async fn graph(&self, repo: &Path, limit: usize) -> ReposerveResult<String>;

    /// Clone `url` into `parent/name`
    async fn clone_repository(&self, parent: &Path, url: &str, name: &str) -> ReposerveResult<String>;

    /// Human-readable backend name
    fn backend_name(&self) -> &'static str;
}
