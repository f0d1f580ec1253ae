//! Modification-time freshness checks
//!
//! The only invalidation primitive: an artifact is stale when it is missing
//! or its source was modified after it. Two writes within one timestamp tick
//! of the filesystem are indistinguishable.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// Whether `artifact` must be regenerated from `source`
pub fn is_stale(source: &Metadata, artifact: Option<&Metadata>) -> bool {
    let Some(artifact) = artifact else {
        return true;
    };
    match (source.modified(), artifact.modified()) {
        (Ok(source), Ok(artifact)) => source > artifact,
        _ => true,
    }
}

/// Stat `artifact_path` and compare it against `source`
///
/// A failed stat other than "not found" is logged and treated as stale.
pub async fn artifact_is_stale(source: &Metadata, artifact_path: &Path) -> bool {
    match tokio::fs::metadata(artifact_path).await {
        Ok(artifact) => is_stale(source, Some(&artifact)),
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Could not stat cache entry {}: {}", artifact_path.display(), e);
            true
        }
    }
}

/// Whether a file exists at `path` that is older than `source`
///
/// Missing entries are not stale here: there is nothing to delete.
pub async fn existing_is_stale(source: &Metadata, path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(artifact) => is_stale(source, Some(&artifact)),
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Could not stat cache entry {}: {}", path.display(), e);
            false
        }
    }
}
