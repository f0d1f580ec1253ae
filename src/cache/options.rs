//! Per-file derived entries: metadata records and transpiled copies
//!
//! Options entries are regenerated in-process when stale. Transpiled copies
//! (and their source maps) are only ever deleted; a downstream transform
//! repopulates them lazily.

use crate::cache::freshness::{artifact_is_stale, existing_is_stale};
use crate::cache::key::CacheKey;
use crate::error::{ReposerveError, ReposerveResult};
use crate::fsutil::{ensure_dir, remove_cache_entry, write_atomic};
use crate::repository::Repository;
use crate::vcs::VersionControl;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Derived metadata for one tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub modified: String,
    /// Set when the source could not be read; the other fields are then void
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OptionsEntry {
    /// Record for a source that could not be stat'ed
    pub fn missing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: "file".to_string(),
            name: name.into(),
            size: 0,
            version: String::new(),
            modified: String::new(),
            error: Some(error.into()),
        }
    }

    /// Whether this record carries the error marker
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Format a modification time the way clients display it
pub fn format_modified(metadata: &Metadata) -> String {
    metadata
        .modified()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Entries removed by a prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub options_removed: usize,
    pub transpile_removed: usize,
}

/// Owner of the options and transpile caches of every repository
pub struct DerivedCache {
    vcs: Arc<dyn VersionControl>,
}

impl DerivedCache {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }

    /// Compute a fresh options record without persisting it
    ///
    /// Costs one version-control call per invocation.
    pub async fn read_options(
        &self,
        repo: &Repository,
        path: &str,
        metadata: Option<&Metadata>,
    ) -> ReposerveResult<OptionsEntry> {
        let owned;
        let metadata = match metadata {
            Some(m) => m,
            None => match fs::metadata(repo.source_path(path)).await {
                Ok(m) => {
                    owned = m;
                    &owned
                }
                Err(e) => {
                    debug!("Options for missing source {}: {}", path, e);
                    return Ok(OptionsEntry::missing(path, e.to_string()));
                }
            },
        };

        let kind = if metadata.is_dir() { "directory" } else { "file" };
        Ok(OptionsEntry {
            kind: kind.to_string(),
            name: path.to_string(),
            size: metadata.len(),
            version: self.vcs.current_version(repo.root(), path).await?,
            modified: format_modified(metadata),
            error: None,
        })
    }

    /// Return the options entry of `path`, regenerating it when stale
    pub async fn ensure_options(
        &self,
        repo: &Repository,
        path: &str,
    ) -> ReposerveResult<OptionsEntry> {
        match fs::metadata(repo.source_path(path)).await {
            Ok(source) => self.ensure_options_with(repo, path, &source).await,
            Err(e) => Ok(OptionsEntry::missing(path, e.to_string())),
        }
    }

    pub(crate) async fn ensure_options_with(
        &self,
        repo: &Repository,
        path: &str,
        source: &Metadata,
    ) -> ReposerveResult<OptionsEntry> {
        let entry_path = repo.options_entry(&CacheKey::from_path(path));

        if !artifact_is_stale(source, &entry_path).await {
            match fs::read_to_string(&entry_path).await {
                Ok(text) => match serde_json::from_str::<OptionsEntry>(&text) {
                    Ok(entry) if !entry.is_error() => return Ok(entry),
                    Ok(_) => debug!("Cached options for {} carry an error, regenerating", path),
                    Err(e) => warn!("Unreadable options entry {}: {}", entry_path.display(), e),
                },
                Err(e) => warn!("Could not read options entry {}: {}", entry_path.display(), e),
            }
        }

        let entry = self.read_options(repo, path, Some(source)).await?;
        info!("Update options {}", entry_path.display());
        self.persist_options(repo, path, &entry).await?;
        Ok(entry)
    }

    /// Store `entry` as the options entry of `path`
    pub async fn persist_options(
        &self,
        repo: &Repository,
        path: &str,
        entry: &OptionsEntry,
    ) -> ReposerveResult<()> {
        ensure_dir(&repo.options_dir()).await?;
        let body = serde_json::to_string_pretty(entry)?;
        write_atomic(&repo.options_entry(&CacheKey::from_path(path)), body.as_bytes()).await
    }

    /// Whether a write to `path` has options to invalidate
    fn invalidates_options(repo: &Repository, path: &str) -> bool {
        let layout = repo.layout();
        !layout.is_options_path(path) && layout.is_derivable(path)
    }

    /// Whether a write to `path` has transpiled copies to invalidate
    fn invalidates_transpile(repo: &Repository, path: &str) -> bool {
        let layout = repo.layout();
        !layout.is_transpile_path(path) && layout.is_derivable(path)
    }

    /// Delete the options entry of `path`
    ///
    /// No-op for paths inside the options directory and for non-derivable
    /// file types. Returns whether an entry was removed.
    pub async fn invalidate_options(&self, repo: &Repository, path: &str) -> bool {
        if !Self::invalidates_options(repo, path) {
            return false;
        }
        let removed = remove_cache_entry(&repo.options_entry(&CacheKey::from_path(path))).await;
        if removed {
            debug!("Invalidated options of {}", path);
        }
        removed
    }

    /// Delete the transpiled copy and source map of `path`
    ///
    /// Same exclusions as [`Self::invalidate_options`]. Returns the number of
    /// files removed.
    pub async fn invalidate_transpile(&self, repo: &Repository, path: &str) -> usize {
        if !Self::invalidates_transpile(repo, path) {
            return 0;
        }
        let removed = self.remove_transpile(repo, &CacheKey::from_path(path)).await;
        if removed > 0 {
            debug!("Invalidated {} transpiled files of {}", removed, path);
        }
        removed
    }

    async fn remove_transpile(&self, repo: &Repository, key: &CacheKey) -> usize {
        let mut removed = 0;
        for entry in [repo.transpile_entry(key), repo.transpile_map(key)] {
            if remove_cache_entry(&entry).await {
                removed += 1;
            }
        }
        removed
    }

    /// Delete the transpiled copy or map of `path` if older than `source`
    pub async fn drop_stale_transpile(
        &self,
        repo: &Repository,
        path: &str,
        source: &Metadata,
    ) -> usize {
        let key = CacheKey::from_path(path);
        let mut removed = 0;
        for entry in [repo.transpile_entry(&key), repo.transpile_map(&key)] {
            if existing_is_stale(source, &entry).await && remove_cache_entry(&entry).await {
                info!("Delete stale {}", entry.display());
                removed += 1;
            }
        }
        removed
    }

    /// Delete every derived entry of `path`, regardless of file type
    pub async fn remove_entries(&self, repo: &Repository, path: &str) {
        let key = CacheKey::from_path(path);
        remove_cache_entry(&repo.options_entry(&key)).await;
        self.remove_transpile(repo, &key).await;
    }

    /// Delete entries whose key is not in `keys`
    pub async fn prune_unreferenced(
        &self,
        repo: &Repository,
        keys: &HashSet<CacheKey>,
    ) -> PruneReport {
        let suffix = repo.layout().transpile_map_suffix.clone();
        let options_removed = prune_dir(&repo.options_dir(), |name| {
            !keys.contains(&CacheKey::from_path(name))
        })
        .await;
        let transpile_removed = prune_dir(&repo.transpile_dir(), |name| {
            let base = name.strip_suffix(suffix.as_str()).unwrap_or(name);
            !keys.contains(&CacheKey::from_path(base))
        })
        .await;

        PruneReport {
            options_removed,
            transpile_removed,
        }
    }
}

/// Names written by [`crate::fsutil::write_atomic`] while in flight
fn is_in_flight(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

async fn prune_dir(dir: &std::path::Path, unreferenced: impl Fn(&str) -> bool) -> usize {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Could not read entry of {}: {}", dir.display(), e);
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_in_flight(&name) || !unreferenced(&name) {
            continue;
        }
        let path = entry.path();
        if remove_cache_entry(&path).await {
            info!("Prune {}", path.display());
            removed += 1;
        }
    }
    removed
}

/// Refuse to trust a record carrying the error marker
pub fn require_valid(entry: OptionsEntry) -> ReposerveResult<OptionsEntry> {
    match entry.error {
        Some(error) => Err(ReposerveError::Internal(format!(
            "could not retrieve new version of {}: {}",
            entry.name, error
        ))),
        None => Ok(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepoLayout;
    use crate::vcs::{Author, MemoryVcs};
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: Repository,
        vcs: Arc<MemoryVcs>,
        cache: DerivedCache,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo = Repository::new("r", dir.path(), Arc::new(RepoLayout::default()));
        let vcs = Arc::new(MemoryVcs::new());
        let cache = DerivedCache::new(vcs.clone());
        Fixture {
            _dir: dir,
            repo,
            vcs,
            cache,
        }
    }

    fn set_mtime(path: &std::path::Path, at: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(at)
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_options_creates_and_reuses_entry() {
        let f = fixture();
        std::fs::write(f.repo.source_path("a.js"), "let a = 1").unwrap();

        let first = f.cache.ensure_options(&f.repo, "a.js").await.unwrap();
        assert_eq!(first.name, "a.js");
        assert_eq!(first.size, 9);
        assert!(f.repo.options_entry(&CacheKey::from_path("a.js")).exists());

        let second = f.cache.ensure_options(&f.repo, "a.js").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn stale_options_are_regenerated() {
        let f = fixture();
        let source = f.repo.source_path("a.js");
        std::fs::write(&source, "v1").unwrap();
        let before = f.cache.ensure_options(&f.repo, "a.js").await.unwrap();
        assert_eq!(before.version, "");

        std::fs::write(&source, "version two").unwrap();
        f.vcs
            .commit(f.repo.root(), "a.js", &Author::default(), "m")
            .await
            .unwrap();
        let entry = f.repo.options_entry(&CacheKey::from_path("a.js"));
        let now = SystemTime::now();
        set_mtime(&entry, now - Duration::from_secs(30));
        set_mtime(&source, now);

        let after = f.cache.ensure_options(&f.repo, "a.js").await.unwrap();
        assert_eq!(after.size, 11);
        assert_ne!(after.version, "");
    }

    #[tokio::test]
    async fn missing_source_yields_error_marker() {
        let f = fixture();
        let entry = f.cache.ensure_options(&f.repo, "gone.js").await.unwrap();
        assert!(entry.is_error());
        assert!(require_valid(entry).is_err());
        assert!(!f.repo.options_entry(&CacheKey::from_path("gone.js")).exists());
    }

    #[tokio::test]
    async fn invalidation_respects_type_and_directory_filters() {
        let f = fixture();
        std::fs::create_dir_all(f.repo.options_dir()).unwrap();
        std::fs::create_dir_all(f.repo.transpile_dir()).unwrap();
        let js = CacheKey::from_path("src/a.js");
        let md = CacheKey::from_path("README.md");
        for path in [
            f.repo.options_entry(&js),
            f.repo.options_entry(&md),
            f.repo.transpile_entry(&js),
            f.repo.transpile_map(&js),
        ] {
            std::fs::write(path, "{}").unwrap();
        }

        assert!(!f.cache.invalidate_options(&f.repo, "README.md").await);
        assert!(f.repo.options_entry(&md).exists());

        assert!(!f.cache.invalidate_options(&f.repo, ".options/src_a.js").await);
        assert!(f.repo.options_entry(&js).exists());

        assert!(f.cache.invalidate_options(&f.repo, "src/a.js").await);
        assert_eq!(f.cache.invalidate_transpile(&f.repo, "src/a.js").await, 2);
        assert!(!f.repo.options_entry(&js).exists());
        assert!(!f.repo.transpile_map(&js).exists());

        assert!(!f.cache.invalidate_options(&f.repo, "src/a.js").await);
    }

    #[tokio::test]
    async fn stale_transpile_is_deleted_fresh_is_kept() {
        let f = fixture();
        std::fs::create_dir_all(f.repo.transpile_dir()).unwrap();
        let source = f.repo.source_path("a.js");
        std::fs::write(&source, "x").unwrap();
        let key = CacheKey::from_path("a.js");
        std::fs::write(f.repo.transpile_entry(&key), "old").unwrap();
        std::fs::write(f.repo.transpile_map(&key), "{}").unwrap();

        let now = SystemTime::now();
        set_mtime(&source, now);
        set_mtime(&f.repo.transpile_entry(&key), now - Duration::from_secs(30));
        set_mtime(&f.repo.transpile_map(&key), now + Duration::from_secs(30));

        let meta = std::fs::metadata(&source).unwrap();
        assert_eq!(f.cache.drop_stale_transpile(&f.repo, "a.js", &meta).await, 1);
        assert!(!f.repo.transpile_entry(&key).exists());
        assert!(f.repo.transpile_map(&key).exists());
    }

    #[tokio::test]
    async fn prune_removes_only_unreferenced() {
        let f = fixture();
        std::fs::create_dir_all(f.repo.options_dir()).unwrap();
        std::fs::create_dir_all(f.repo.transpile_dir()).unwrap();
        let keep = CacheKey::from_path("src/keep.js");
        let drop = CacheKey::from_path("src/drop.js");
        for path in [
            f.repo.options_entry(&keep),
            f.repo.options_entry(&drop),
            f.repo.transpile_entry(&keep),
            f.repo.transpile_map(&keep),
            f.repo.transpile_entry(&drop),
            f.repo.transpile_map(&drop),
        ] {
            std::fs::write(path, "x").unwrap();
        }

        let keys: HashSet<CacheKey> = [keep.clone()].into_iter().collect();
        let report = f.cache.prune_unreferenced(&f.repo, &keys).await;

        assert_eq!(
            report,
            PruneReport {
                options_removed: 1,
                transpile_removed: 2
            }
        );
        assert!(f.repo.options_entry(&keep).exists());
        assert!(f.repo.transpile_map(&keep).exists());
        assert!(!f.repo.transpile_map(&drop).exists());
    }

    #[tokio::test]
    async fn remove_entries_ignores_type_filter() {
        let f = fixture();
        std::fs::create_dir_all(f.repo.options_dir()).unwrap();
        let key = CacheKey::from_path("notes.txt");
        std::fs::write(f.repo.options_entry(&key), "{}").unwrap();

        f.cache.remove_entries(&f.repo, "notes.txt").await;
        assert!(!f.repo.options_entry(&key).exists());
    }
}
