//! In-process version control
//!
//! Snapshots file bytes on commit and issues sequential version identifiers.
//! There is one branch and no remote: remote operations are recorded but
//! touch nothing, and a clone creates an empty directory.

use crate::error::{ReposerveError, ReposerveResult};
use crate::vcs::{Author, CommitOutcome, DiffTarget, SyncRequest, VersionControl, VersionEntry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Revision {
    version: String,
    content: Vec<u8>,
    entry: VersionEntry,
}

/// Version control kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryVcs {
    next: AtomicU64,
    revisions: Mutex<HashMap<(PathBuf, String), Vec<Revision>>>,
    syncs: AtomicU64,
}

impl MemoryVcs {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed sync operations
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::SeqCst)
    }

    fn key(repo: &Path, path: &str) -> (PathBuf, String) {
        (repo.to_path_buf(), path.trim_end_matches('/').to_string())
    }

    fn revisions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(PathBuf, String), Vec<Revision>>> {
        self.revisions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VersionControl for MemoryVcs {
    async fn current_version(&self, repo: &Path, path: &str) -> ReposerveResult<String> {
        Ok(self
            .revisions()
            .get(&Self::key(repo, path))
            .and_then(|revs| revs.last())
            .map(|rev| rev.version.clone())
            .unwrap_or_default())
    }

    async fn content_at(&self, repo: &Path, path: &str, version: &str) -> ReposerveResult<Vec<u8>> {
        self.revisions()
            .get(&Self::key(repo, path))
            .and_then(|revs| revs.iter().find(|rev| rev.version == version))
            .map(|rev| rev.content.clone())
            .ok_or_else(|| {
                ReposerveError::backend(
                    format!("show {}:{}", version, path),
                    format!("fatal: invalid object name '{}'", version),
                )
            })
    }

    async fn commit(
        &self,
        repo: &Path,
        path: &str,
        author: &Author,
        message: &str,
    ) -> ReposerveResult<CommitOutcome> {
        let full = repo.join(path);
        let content = tokio::fs::read(&full)
            .await
            .map_err(|e| ReposerveError::io(format!("reading {} for commit", full.display()), e))?;

        let mut revisions = self.revisions();
        let history = revisions.entry(Self::key(repo, path)).or_default();
        if history.last().is_some_and(|rev| rev.content == content) {
            return Ok(CommitOutcome::NothingToCommit);
        }

        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let version = format!("{:040x}", n);
        let parents = history
            .last()
            .map(|rev| vec![rev.version.clone()])
            .unwrap_or_default();
        let entry = VersionEntry {
            version: version.clone(),
            date: Utc::now().to_rfc2822(),
            author: author.name.clone().unwrap_or_else(|| "unknown".to_string()),
            parents,
            comment: message.to_string(),
        };
        history.push(Revision {
            version,
            content,
            entry,
        });
        Ok(CommitOutcome::Committed)
    }

    async fn history(&self, repo: &Path, path: &str) -> ReposerveResult<Vec<VersionEntry>> {
        let revisions = self.revisions();
        let prefix = path.trim_end_matches('/');
        let mut entries: Vec<VersionEntry> = revisions
            .iter()
            .filter(|((r, p), _)| {
                r == repo && (prefix.is_empty() || p == prefix || p.starts_with(&format!("{prefix}/")))
            })
            .flat_map(|(_, revs)| revs.iter().map(|rev| rev.entry.clone()))
            .collect();
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(entries)
    }

    async fn sync(&self, _repo: &Path, _request: &SyncRequest) -> ReposerveResult<String> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok("Already up to date.\n".to_string())
    }

    async fn checkout_from_remote(
        &self,
        _repo: &Path,
        branch: &str,
        path: &str,
    ) -> ReposerveResult<String> {
        Ok(format!("{} is already at {}\n", path, branch))
    }

    async fn status(&self, repo: &Path) -> ReposerveResult<String> {
        let count = self.revisions().keys().filter(|(r, _)| r == repo).count();
        Ok(format!("{} tracked paths\n", count))
    }

    async fn log(&self, repo: &Path, limit: usize) -> ReposerveResult<String> {
        let lines: Vec<String> = self
            .history(repo, "")
            .await?
            .into_iter()
            .take(limit)
            .map(|e| format!("{}\t{}\t{}\t{}", &e.version[32..], e.author, e.date, e.comment))
            .collect();
        Ok(lines.join("\n"))
    }

    async fn commit_all(&self, repo: &Path, author: &Author, message: &str) -> ReposerveResult<String> {
        let tracked: Vec<String> = self
            .revisions()
            .keys()
            .filter(|(r, _)| r == repo)
            .map(|(_, p)| p.clone())
            .collect();

        let mut changed = 0;
        for path in tracked {
            if !repo.join(&path).is_file() {
                continue;
            }
            if self.commit(repo, &path, author, message).await? == CommitOutcome::Committed {
                changed += 1;
            }
        }
        if changed == 0 {
            return Ok("nothing to commit, working tree clean\n".to_string());
        }
        Ok(format!("{} files changed\n", changed))
    }

    async fn diff(&self, repo: &Path, target: &DiffTarget) -> ReposerveResult<String> {
        let DiffTarget::Commit(commit) = target else {
            return Ok(String::new());
        };
        let revisions = self.revisions();
        let mut paths: Vec<&str> = revisions
            .iter()
            .filter(|((r, _), revs)| r == repo && revs.iter().any(|rev| &rev.version == commit))
            .map(|((_, p), _)| p.as_str())
            .collect();
        if paths.is_empty() {
            return Err(ReposerveError::backend(
                format!("diff {}~1 {}", commit, commit),
                format!("fatal: bad revision '{}'", commit),
            ));
        }
        paths.sort_unstable();
        Ok(paths
            .iter()
            .map(|p| format!("--- a/{p}\n+++ b/{p}\n"))
            .collect())
    }

    async fn branches(&self, _repo: &Path) -> ReposerveResult<String> {
        Ok("* main\n".to_string())
    }

    async fn remote_url(&self, _repo: &Path) -> ReposerveResult<String> {
        Ok(String::new())
    }

    async fn graph(&self, repo: &Path, limit: usize) -> ReposerveResult<String> {
        let log = self.log(repo, limit).await?;
        Ok(log.lines().map(|line| format!("* {}\n", line)).collect())
    }

    async fn clone_repository(&self, parent: &Path, url: &str, name: &str) -> ReposerveResult<String> {
        let target = parent.join(name);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(ReposerveError::AlreadyExists(target));
        }
        tokio::fs::create_dir(&target)
            .await
            .map_err(|e| ReposerveError::io(format!("creating {}", target.display()), e))?;
        Ok(format!("Cloning into '{}' from {}...\n", name, url))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
