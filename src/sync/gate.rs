//! Per-repository mutual exclusion for long-running operations
//!
//! Callers never wait: a held gate is reported immediately.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Set of repositories with an operation in progress
#[derive(Debug, Clone, Default)]
pub struct SyncGate {
    held: Arc<Mutex<HashSet<String>>>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomically mark `repository` busy
    ///
    /// Returns `None` if it already was. The returned guard releases the
    /// gate when dropped, on every exit path.
    pub fn try_enter(&self, repository: &str) -> Option<SyncGuard> {
        if !self.held().insert(repository.to_string()) {
            debug!("Sync gate for {} already held", repository);
            return None;
        }
        Some(SyncGuard {
            gate: self.clone(),
            repository: repository.to_string(),
        })
    }

    /// Release `repository`
    pub fn leave(&self, repository: &str) {
        self.held().remove(repository);
    }

    /// Whether an operation on `repository` is in progress
    pub fn is_held(&self, repository: &str) -> bool {
        self.held().contains(repository)
    }
}

/// Held gate; dropping it calls [`SyncGate::leave`]
#[derive(Debug)]
pub struct SyncGuard {
    gate: SyncGate,
    repository: String,
}

impl SyncGuard {
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.gate.leave(&self.repository);
    }
}
