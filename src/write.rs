//! Conflict-aware write pipeline
//!
//! A write moves strictly through
//! `Invalidating -> ConflictCheck -> Persisting -> Committing -> MetadataRefresh`.
//! Derived entries are dropped before the version check, so even a rejected
//! write leaves them to be regenerated on the next read.

use crate::cache::{require_valid, BundleBuilder, DerivedCache, OptionsEntry};
use crate::error::{ReposerveError, ReposerveResult};
use crate::fsutil::{ensure_dir, write_atomic};
use crate::repository::Repository;
use crate::vcs::{Author, CommitOutcome, VersionControl};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Step of a single write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Invalidating,
    ConflictCheck,
    Persisting,
    Committing,
    MetadataRefresh,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalidating => "invalidating",
            Self::ConflictCheck => "conflict check",
            Self::Persisting => "persisting",
            Self::Committing => "committing",
            Self::MetadataRefresh => "metadata refresh",
        };
        f.write_str(name)
    }
}

/// How the body is interpreted, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Text,
    Binary,
}

/// A buffered write of one path
#[derive(Debug, Clone)]
pub struct WriteRequest<'a> {
    /// Path relative to the repository root; a trailing `/` denotes a directory
    pub path: &'a str,
    pub body: &'a [u8],
    /// Version the client last saw
    pub last_version: Option<&'a str>,
    /// Suppress the commit even when auto-commit is on
    pub no_commit: bool,
    pub author: Author,
}

impl WriteRequest<'_> {
    fn is_directory(&self) -> bool {
        self.path.is_empty() || self.path.ends_with('/')
    }
}

/// Successful end of a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// File content landed; `options` is absent for paths inside a cache directory
    Written {
        version: String,
        options: Option<OptionsEntry>,
    },
    DirectoryCreated(PathBuf),
}

/// Runs writes against any repository
pub struct WritePipeline {
    vcs: Arc<dyn VersionControl>,
    cache: Arc<DerivedCache>,
    bundles: Arc<BundleBuilder>,
    auto_commit: bool,
}

impl WritePipeline {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        cache: Arc<DerivedCache>,
        bundles: Arc<BundleBuilder>,
        auto_commit: bool,
    ) -> Self {
        Self {
            vcs,
            cache,
            bundles,
            auto_commit,
        }
    }

    /// Encoding used for the body of `path`
    pub fn encoding(repo: &Repository, path: &str) -> BodyEncoding {
        if repo.layout().is_text(path) {
            BodyEncoding::Text
        } else {
            BodyEncoding::Binary
        }
    }

    /// Apply `request` to `repo`
    ///
    /// A stale `last_version` fails with [`ReposerveError::Conflict`] before
    /// anything is written.
    pub async fn write(
        &self,
        repo: &Repository,
        request: WriteRequest<'_>,
    ) -> ReposerveResult<WriteOutcome> {
        let path = request.path;
        let full = repo.source_path(path);
        info!("write file: {}", full.display());

        stage(WriteStage::Invalidating, path);
        self.cache.invalidate_options(repo, path).await;
        self.cache.invalidate_transpile(repo, path).await;
        self.bundles.invalidate_bundle(repo, path).await?;
        self.ensure_special_parents(repo, path).await?;

        stage(WriteStage::ConflictCheck, path);
        let current = self.vcs.current_version(repo.root(), path).await?;
        if let Some(last) = request.last_version.filter(|v| !v.is_empty()) {
            debug!("last version: {}, current version: {}", last, current);
            if !current.is_empty() && last != current {
                warn!("Writing conflict on {}: {} != {}", path, last, current);
                return Err(ReposerveError::Conflict {
                    current_version: current,
                });
            }
        }

        stage(WriteStage::Persisting, path);
        if request.is_directory() {
            ensure_dir(&full).await?;
            info!("mkdir {}", full.display());
            return Ok(WriteOutcome::DirectoryCreated(full));
        }
        if Self::encoding(repo, path) == BodyEncoding::Text
            && std::str::from_utf8(request.body).is_err()
        {
            debug!("{} has a text extension but a non-UTF-8 body", path);
        }
        write_atomic(&full, request.body).await?;
        debug!("saved {} ({} bytes)", full.display(), request.body.len());

        if self.auto_commit && !request.no_commit {
            stage(WriteStage::Committing, path);
            let message = format!("AUTO-COMMIT {}", path);
            match self
                .vcs
                .commit(repo.root(), path, &request.author, &message)
                .await?
            {
                CommitOutcome::Committed => info!("Committed {}", path),
                CommitOutcome::NothingToCommit => debug!("{} unchanged, nothing to commit", path),
            }
        }

        stage(WriteStage::MetadataRefresh, path);
        let layout = repo.layout();
        if layout.is_options_path(path) || layout.is_transpile_path(path) {
            let version = self.vcs.current_version(repo.root(), path).await?;
            return Ok(WriteOutcome::Written {
                version,
                options: None,
            });
        }
        let options = require_valid(self.cache.read_options(repo, path, None).await?)?;
        self.cache.persist_options(repo, path, &options).await?;
        Ok(WriteOutcome::Written {
            version: options.version.clone(),
            options: Some(options),
        })
    }

    /// Writes into a cache directory create their parent directories
    async fn ensure_special_parents(&self, repo: &Repository, path: &str) -> ReposerveResult<()> {
        let layout = repo.layout();
        if !layout.is_options_path(path) && !layout.is_transpile_path(path) {
            return Ok(());
        }
        if let Some(parent) = repo.source_path(path.trim_end_matches('/')).parent() {
            ensure_dir(parent).await?;
        }
        Ok(())
    }
}

fn stage(stage: WriteStage, path: &str) {
    debug!("[write {}] {}", path, stage);
}
