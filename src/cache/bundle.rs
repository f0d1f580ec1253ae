//! Bundle archive assembly
//!
//! The boot-file manifest defines the bundle's members and which derived
//! entries survive a prune. An existing archive is reused as-is: the only
//! thing that clears it is [`BundleBuilder::invalidate_bundle`], so a source
//! changed behind the server's back stays stale in the bundle until some
//! manifest file is written through it.

use crate::cache::archive::Archiver;
use crate::cache::key::CacheKey;
use crate::cache::options::DerivedCache;
use crate::error::{ReposerveError, ReposerveResult};
use crate::fsutil::{ensure_dir, remove_if_exists, temp_sibling};
use crate::repository::Repository;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Newline-delimited list of boot files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    raw: String,
    entries: Vec<String>,
}

impl Manifest {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw: text.to_string(),
            entries,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Flattened keys of every listed file
    pub fn keys(&self) -> HashSet<CacheKey> {
        self.entries.iter().map(|e| CacheKey::from_path(e)).collect()
    }

    /// Textual search of the manifest for `path`
    pub fn mentions(&self, path: &str) -> bool {
        !path.is_empty() && self.raw.contains(path)
    }
}

/// Read a repository's manifest; `None` when it cannot be read
pub async fn read_manifest(repo: &Repository) -> Option<Manifest> {
    let path = repo.manifest_path();
    match fs::read_to_string(&path).await {
        Ok(text) => Some(Manifest::parse(&text)),
        Err(e) => {
            warn!("Could not read {}: {}", path.display(), e);
            None
        }
    }
}

/// Relative, non-escaping manifest entry
fn is_safe_member(entry: &str) -> bool {
    Path::new(entry)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Assembles and invalidates bundle archives
pub struct BundleBuilder {
    cache: Arc<DerivedCache>,
    archiver: Arc<dyn Archiver>,
}

impl BundleBuilder {
    pub fn new(cache: Arc<DerivedCache>, archiver: Arc<dyn Archiver>) -> Self {
        Self { cache, archiver }
    }

    /// Refresh the manifest's derived entries and return the archive path
    ///
    /// The archive is built only when absent.
    pub async fn ensure_bundle(&self, repo: &Repository) -> ReposerveResult<PathBuf> {
        info!("Bundle for {}", repo.root().display());
        ensure_dir(&repo.options_dir()).await?;
        ensure_dir(&repo.transpile_dir()).await?;

        let members = match read_manifest(repo).await {
            Some(manifest) => self.refresh_members(repo, &manifest).await?,
            None => Vec::new(),
        };

        let bundle = repo.bundle_path();
        if fs::try_exists(&bundle).await.unwrap_or(false) {
            debug!("Reusing {}", bundle.display());
            return Ok(bundle);
        }

        let temp = temp_sibling(&bundle);
        if let Err(e) = self.archiver.create(repo.root(), &temp, &members).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        fs::rename(&temp, &bundle)
            .await
            .map_err(|e| ReposerveError::io(format!("installing {}", bundle.display()), e))?;

        info!("Created {} with {} members", bundle.display(), members.len());
        Ok(bundle)
    }

    /// Bring every manifest file's derived entries up to date, prune the
    /// rest, and list the archive members
    async fn refresh_members(
        &self,
        repo: &Repository,
        manifest: &Manifest,
    ) -> ReposerveResult<Vec<String>> {
        let layout = repo.layout();
        let mut sources = Vec::new();
        let mut options = Vec::new();
        let mut transpiled = Vec::new();

        for file in manifest.entries() {
            if !is_safe_member(file) {
                warn!("Skipping manifest entry outside the repository: {}", file);
                continue;
            }
            let source = match fs::metadata(repo.source_path(file)).await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => {
                    warn!("Skipping manifest entry that is not a file: {}", file);
                    continue;
                }
                Err(e) => {
                    warn!("Could not stat {}: {}", file, e);
                    continue;
                }
            };

            let key = CacheKey::from_path(file);
            self.cache.ensure_options_with(repo, file, &source).await?;
            self.cache.drop_stale_transpile(repo, file, &source).await;

            sources.push(file.clone());
            options.push(format!("{}/{}", layout.options_dir, key));
            for entry in [repo.transpile_entry(&key), repo.transpile_map(&key)] {
                match fs::metadata(&entry).await {
                    Ok(_) => {
                        if let Some(name) = entry.file_name() {
                            transpiled.push(format!(
                                "{}/{}",
                                layout.transpile_dir,
                                name.to_string_lossy()
                            ));
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!("Could not stat {}: {}", entry.display(), e),
                }
            }
        }

        let report = self.cache.prune_unreferenced(repo, &manifest.keys()).await;
        debug!(
            "Pruned {} options and {} transpiled entries",
            report.options_removed, report.transpile_removed
        );

        sources.extend(options);
        sources.extend(transpiled);
        Ok(sources)
    }

    /// Delete the bundle if a write to `path` can change its content
    ///
    /// Applies to paths inside the transpile directory, the manifest itself,
    /// and any path the manifest mentions. Returns whether an archive was
    /// removed.
    pub async fn invalidate_bundle(&self, repo: &Repository, path: &str) -> ReposerveResult<bool> {
        let layout = repo.layout();
        let affected = layout.is_transpile_path(path)
            || path == layout.bootlist
            || read_manifest(repo)
                .await
                .is_some_and(|manifest| manifest.mentions(path));

        if !affected {
            debug!("{} is not part of the bundle of {}", path, repo.root().display());
            return Ok(false);
        }

        let removed = remove_if_exists(&repo.bundle_path()).await?;
        if removed {
            info!("Invalidated {}", repo.bundle_path().display());
        }
        Ok(removed)
    }
}
