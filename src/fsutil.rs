//! Filesystem helpers shared by the cache and the write pipeline

use crate::error::{ReposerveError, ReposerveResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::warn;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A sibling temp path unique within this process
pub fn temp_sibling(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}-{}.tmp", name, std::process::id(), n))
}

/// Replace `path` with `bytes` via a temp file and rename
///
/// Readers see either the old content or the new content, never a prefix.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> ReposerveResult<()> {
    let temp = temp_sibling(path);
    if let Err(e) = fs::write(&temp, bytes).await {
        return Err(ReposerveError::io(format!("writing {}", path.display()), e));
    }
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(ReposerveError::io(format!("replacing {}", path.display()), e));
    }
    Ok(())
}

/// Remove a file, treating "not found" as success
///
/// Returns whether a file was removed.
pub async fn remove_if_exists(path: &Path) -> ReposerveResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ReposerveError::io(format!("removing {}", path.display()), e)),
    }
}

/// Remove a cache entry; failures are logged and never propagate
pub async fn remove_cache_entry(path: &Path) -> bool {
    match remove_if_exists(path).await {
        Ok(removed) => removed,
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Create `dir` if it does not exist
pub async fn ensure_dir(dir: &Path) -> ReposerveResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| ReposerveError::io(format!("creating directory {}", dir.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        write_atomic(&path, b"hello").await.unwrap();
        write_atomic(&path, b"world").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"world");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn atomic_write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let err = write_atomic(&dir.path().join("nope/file.txt"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, ReposerveError::Io { .. }));
    }

    #[tokio::test]
    async fn remove_missing_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");
        assert!(!remove_if_exists(&path).await.unwrap());
        std::fs::write(&path, "x").unwrap();
        assert!(remove_cache_entry(&path).await);
    }

    #[test]
    fn temp_siblings_are_unique() {
        let path = Path::new("/srv/r/file.js");
        let a = temp_sibling(path);
        let b = temp_sibling(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
    }
}
