//! Repository layout and request path resolution

use crate::cache::CacheKey;
use crate::config::schema::CacheConfig;
use crate::error::{ReposerveError, ReposerveResult};
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Names of the well-known files and cache directories inside a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    pub options_dir: String,
    pub transpile_dir: String,
    pub bootlist: String,
    pub bundle_name: String,
    pub transpile_map_suffix: String,
    pub derivable_extensions: Vec<String>,
    pub text_extensions: Vec<String>,
}

impl RepoLayout {
    /// Whether `path` lives inside the top-level cache directory `dir`
    fn is_inside(path: &str, dir: &str) -> bool {
        path.split('/').next() == Some(dir)
    }

    /// Whether `path` lies in the options cache directory
    pub fn is_options_path(&self, path: &str) -> bool {
        Self::is_inside(path, &self.options_dir)
    }

    /// Whether `path` lies in the transpile cache directory
    pub fn is_transpile_path(&self, path: &str) -> bool {
        Self::is_inside(path, &self.transpile_dir)
    }

    /// Whether writes to `path` have derived entries to invalidate
    pub fn is_derivable(&self, path: &str) -> bool {
        has_extension(path, &self.derivable_extensions)
    }

    /// Whether `path` is received as text rather than binary
    pub fn is_text(&self, path: &str) -> bool {
        has_extension(path, &self.text_extensions)
    }
}

impl From<&CacheConfig> for RepoLayout {
    fn from(config: &CacheConfig) -> Self {
        Self {
            options_dir: config.options_dir.clone(),
            transpile_dir: config.transpile_dir.clone(),
            bootlist: config.bootlist.clone(),
            bundle_name: config.bundle_name.clone(),
            transpile_map_suffix: config.transpile_map_suffix.clone(),
            derivable_extensions: config.derivable_extensions.clone(),
            text_extensions: config.text_extensions.clone(),
        }
    }
}

impl Default for RepoLayout {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

fn has_extension(path: &str, extensions: &[String]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// A served repository: a root directory plus its logical name
#[derive(Debug, Clone)]
pub struct Repository {
    name: String,
    root: PathBuf,
    layout: Arc<RepoLayout>,
}

impl Repository {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, layout: Arc<RepoLayout>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            layout,
        }
    }

    /// Logical name, used as the sync-gate and webhook key
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    /// Absolute path of a tracked file
    pub fn source_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub fn options_dir(&self) -> PathBuf {
        self.root.join(&self.layout.options_dir)
    }

    pub fn transpile_dir(&self) -> PathBuf {
        self.root.join(&self.layout.transpile_dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.layout.bootlist)
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.root.join(&self.layout.bundle_name)
    }

    pub fn options_entry(&self, key: &CacheKey) -> PathBuf {
        self.options_dir().join(key.as_str())
    }

    pub fn transpile_entry(&self, key: &CacheKey) -> PathBuf {
        self.transpile_dir().join(key.as_str())
    }

    pub fn transpile_map(&self, key: &CacheKey) -> PathBuf {
        self.transpile_dir()
            .join(format!("{}{}", key.as_str(), self.layout.transpile_map_suffix))
    }

    /// Whether `path` names this repository's bundle archive
    pub fn is_bundle(&self, path: &str) -> bool {
        path == self.layout.bundle_name
    }
}

/// Decode a URL path and reject anything that could leave the storage area
pub fn decode_path(url_path: &str) -> ReposerveResult<String> {
    let decoded = percent_decode_str(url_path)
        .decode_utf8()
        .map_err(|e| ReposerveError::PathInvalid {
            path: url_path.to_string(),
            reason: e.to_string(),
        })?
        .into_owned();

    if decoded.contains('\0') || decoded.contains('\\') {
        return Err(ReposerveError::PathEscape(decoded));
    }
    if Path::new(&decoded)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ReposerveError::PathEscape(decoded));
    }
    Ok(decoded)
}

/// Check a repository name taken from a header
pub fn check_repository_name(name: &str) -> ReposerveResult<&str> {
    let name = name.trim_start_matches('/');
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ReposerveError::InvalidArgument {
            name: "repository",
            value: name.to_string(),
        });
    }
    Ok(name)
}

/// Reject empty segments before the last one
///
/// `/repo//etc` would otherwise leave `/etc` as the relative part, and
/// joining an absolute path discards the root. A trailing `/` still marks
/// a directory.
fn check_relative(decoded: &str, trimmed: &str) -> ReposerveResult<()> {
    let mut segments = trimmed.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segment.is_empty() && segments.peek().is_some() {
            return Err(ReposerveError::PathEscape(decoded.to_string()));
        }
    }
    if Path::new(trimmed)
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err(ReposerveError::PathEscape(decoded.to_string()));
    }
    Ok(())
}

/// Resolve `/<repo>/<path>` below `root_dir`
///
/// A path without a second segment resolves against `root_dir` itself, whose
/// repository name is empty.
pub fn resolve(
    root_dir: &Path,
    layout: &Arc<RepoLayout>,
    url_path: &str,
) -> ReposerveResult<(Repository, String)> {
    let decoded = decode_path(url_path)?;
    let trimmed = decoded.strip_prefix('/').unwrap_or(&decoded);
    check_relative(&decoded, trimmed)?;

    match trimmed.split_once('/') {
        Some((repo, rest)) if !repo.is_empty() && repo != "." => Ok((
            Repository::new(repo, root_dir.join(repo), Arc::clone(layout)),
            rest.to_string(),
        )),
        _ => Ok((
            Repository::new("", root_dir, Arc::clone(layout)),
            trimmed.to_string(),
        )),
    }
}
