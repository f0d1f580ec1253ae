//! Expiring in-memory blob store

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Blob {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Named blobs, each living `ttl` past its latest write
#[derive(Debug, Clone)]
pub struct TempStore {
    blobs: Arc<Mutex<HashMap<String, Blob>>>,
    ttl: Duration,
}

impl TempStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Blob>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `bytes` under `name`, restarting its lifetime
    pub fn put(&self, name: &str, bytes: Vec<u8>) {
        let now = Instant::now();
        let mut blobs = self.blobs();
        blobs.retain(|_, blob| blob.expires_at > now);
        debug!("tmp put {} ({} bytes)", name, bytes.len());
        blobs.insert(
            name.to_string(),
            Blob {
                bytes,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Bytes stored under `name`, unless expired
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        let mut blobs = self.blobs();
        match blobs.get(name) {
            Some(blob) if blob.expires_at > Instant::now() => Some(blob.bytes.clone()),
            Some(_) => {
                debug!("cleanup {}", name);
                blobs.remove(name);
                None
            }
            None => None,
        }
    }

    /// Number of live blobs
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.blobs()
            .values()
            .filter(|blob| blob.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
