//! Read, list, delete and directory creation for tracked files

use crate::cache::options::format_modified;
use crate::cache::{BundleBuilder, DerivedCache, OptionsEntry};
use crate::error::{ReposerveError, ReposerveResult};
use crate::repository::Repository;
use crate::vcs::{VersionControl, VersionEntry};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Body of a successful GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRead {
    File {
        content: Vec<u8>,
        content_type: String,
        version: String,
        modified: String,
    },
    /// HTML index of a directory
    Directory(String),
}

/// What an OPTIONS request asks for
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsQuery {
    pub show_versions: bool,
    pub file_list: bool,
}

/// One child of a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub size: u64,
}

/// One file of a recursive listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileListEntry {
    pub modified: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub size: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing<T> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub contents: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Versions {
    pub versions: Vec<VersionEntry>,
}

/// JSON answer to an OPTIONS request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionsReply {
    Versions(Versions),
    FileList(Listing<FileListEntry>),
    Directory(Listing<DirEntry>),
    /// File metadata; carries the error marker when the path is missing
    Entry(OptionsEntry),
}

impl OptionsReply {
    pub fn to_json(&self) -> ReposerveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// File operations other than writes
pub struct FileService {
    vcs: Arc<dyn VersionControl>,
    cache: Arc<DerivedCache>,
    bundles: Arc<BundleBuilder>,
}

impl FileService {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        cache: Arc<DerivedCache>,
        bundles: Arc<BundleBuilder>,
    ) -> Self {
        Self {
            vcs,
            cache,
            bundles,
        }
    }

    /// Current content of `path`, the bundle, or a directory index
    pub async fn read(&self, repo: &Repository, path: &str) -> ReposerveResult<FileRead> {
        let full = if repo.is_bundle(path) {
            self.bundles.ensure_bundle(repo).await?
        } else {
            repo.source_path(path)
        };
        debug!("read {}", full.display());

        let metadata = match fs::metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ReposerveError::NotFound(full));
            }
            Err(e) => return Err(ReposerveError::io(format!("stat {}", full.display()), e)),
        };
        if metadata.is_dir() {
            let entries = list_directory(&full).await?;
            return Ok(FileRead::Directory(directory_index(&full, &entries)));
        }

        let content = fs::read(&full)
            .await
            .map_err(|e| ReposerveError::io(format!("reading {}", full.display()), e))?;
        Ok(FileRead::File {
            content,
            content_type: content_type(&full),
            version: self.vcs.current_version(repo.root(), path).await?,
            modified: format_modified(&metadata),
        })
    }

    /// Content of `path` as of `version`
    pub async fn read_version(
        &self,
        repo: &Repository,
        path: &str,
        version: &str,
    ) -> ReposerveResult<Vec<u8>> {
        debug!("read {} at {}", path, version);
        self.vcs.content_at(repo.root(), path, version).await
    }

    /// Metadata, listing or history of `path`
    pub async fn options(
        &self,
        repo: &Repository,
        path: &str,
        query: OptionsQuery,
    ) -> ReposerveResult<OptionsReply> {
        let full = repo.source_path(path);
        let metadata = match fs::metadata(&full).await {
            Ok(m) => m,
            Err(e) => {
                debug!("OPTIONS on missing {}: {}", full.display(), e);
                return Ok(OptionsReply::Entry(OptionsEntry::missing(path, e.to_string())));
            }
        };

        if query.show_versions {
            let versions = self.vcs.history(repo.root(), path).await?;
            return Ok(OptionsReply::Versions(Versions { versions }));
        }
        if metadata.is_dir() {
            if query.file_list {
                let root = full.clone();
                let contents = tokio::task::spawn_blocking(move || file_list(&root))
                    .await
                    .map_err(|e| ReposerveError::Internal(format!("file list task: {}", e)))?;
                info!("file list of {} has {} entries", full.display(), contents.len());
                return Ok(OptionsReply::FileList(Listing {
                    kind: "filelist",
                    contents,
                }));
            }
            return Ok(OptionsReply::Directory(Listing {
                kind: "directory",
                contents: list_directory(&full).await?,
            }));
        }

        let entry = self.cache.read_options(repo, path, Some(&metadata)).await?;
        Ok(OptionsReply::Entry(entry))
    }

    /// Delete `path` after its derived entries
    pub async fn delete(&self, repo: &Repository, path: &str) -> ReposerveResult<PathBuf> {
        self.cache.remove_entries(repo, path).await;
        self.bundles.invalidate_bundle(repo, path).await?;

        let full = repo.source_path(path);
        let metadata = match fs::symlink_metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ReposerveError::NotFound(full));
            }
            Err(e) => return Err(ReposerveError::io(format!("stat {}", full.display()), e)),
        };
        let removed = if metadata.is_dir() {
            fs::remove_dir(&full).await
        } else {
            fs::remove_file(&full).await
        };
        removed.map_err(|e| ReposerveError::io(format!("deleting {}", full.display()), e))?;

        info!("deleted {}", full.display());
        Ok(full)
    }

    /// Create the single directory `path`
    pub async fn mkcol(&self, repo: &Repository, path: &str) -> ReposerveResult<PathBuf> {
        let full = repo.source_path(path.trim_end_matches('/'));
        match fs::create_dir(&full).await {
            Ok(()) => {
                info!("created directory {}", full.display());
                Ok(full)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ReposerveError::AlreadyExists(full)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let parent = full.parent().map(Path::to_path_buf).unwrap_or_default();
                Err(ReposerveError::NotFound(parent))
            }
            Err(e) => Err(ReposerveError::io(format!("creating {}", full.display()), e)),
        }
    }
}

fn content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Immediate children of `dir`, sorted by name
async fn list_directory(dir: &Path) -> ReposerveResult<Vec<DirEntry>> {
    let mut reader = fs::read_dir(dir)
        .await
        .map_err(|e| ReposerveError::io(format!("listing {}", dir.display()), e))?;

    let mut contents = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| ReposerveError::io(format!("listing {}", dir.display()), e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let item = match entry.metadata().await {
            Ok(m) if m.is_dir() => DirEntry {
                kind: "directory",
                name,
                size: 0,
            },
            Ok(m) => DirEntry {
                kind: "file",
                name,
                size: m.len(),
            },
            Err(e) => {
                warn!("Could not stat {}: {}", entry.path().display(), e);
                DirEntry {
                    kind: "file",
                    name,
                    size: 0,
                }
            }
        };
        contents.push(item);
    }
    contents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(contents)
}

/// Recursive listing below `root`, skipping `.git`
fn file_list(root: &Path) -> Vec<FileListEntry> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let relative = entry.path().strip_prefix(root).ok()?;
            let modified = metadata
                .modified()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            Some(FileListEntry {
                modified,
                kind: if metadata.is_dir() { "directory" } else { "file" },
                size: metadata.len(),
                name: format!("./{}", relative.to_string_lossy()),
            })
        })
        .collect()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
        .replace('"', "&quot;")
}

/// HTML page linking every child of `dir`
fn directory_index(dir: &Path, entries: &[DirEntry]) -> String {
    // links are relative to the directory's parent unless the URL ends in '/'
    let prefix = dir
        .file_name()
        .map(|name| format!("{}/", name.to_string_lossy()))
        .unwrap_or_default();
    let title = escape_html(&dir.to_string_lossy());

    let items: Vec<String> = entries
        .iter()
        .map(|entry| {
            let name = escape_html(&entry.name);
            format!(
                "<li><a href='{}{}'>{}</a></li>",
                escape_html(&prefix),
                name,
                name
            )
        })
        .collect();
    format!(
        "<html><body><h1>{}</h1>\n<ul>{}</ul></body></html>",
        title,
        items.join("\n")
    )
}
