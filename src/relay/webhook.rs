//! Webhook fan-out to long-polling listeners
//!
//! A listener waits until the next payload for its repository arrives.
//! Each payload answers every listener registered at that moment, once.

use crate::error::{ReposerveError, ReposerveResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info};

type Listeners = HashMap<String, Vec<oneshot::Sender<String>>>;

/// Registry of waiting listeners keyed by repository full name
#[derive(Debug, Clone, Default)]
pub struct WebhookRelay {
    listeners: Arc<Mutex<Listeners>>,
}

impl WebhookRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for the next payload for `key`
    ///
    /// Listeners that went away since the last registration are dropped
    /// first, so keys that never see a signal do not accumulate.
    pub fn register(&self, key: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        debug!("webhook register {}", key);
        let mut listeners = self.listeners();
        listeners.retain(|_, txs| {
            txs.retain(|tx| !tx.is_closed());
            !txs.is_empty()
        });
        listeners.entry(key.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver a webhook payload
    ///
    /// The key is the payload's `repository.full_name`. Returns how many
    /// listeners received it.
    pub fn signal(&self, body: &[u8]) -> ReposerveResult<usize> {
        let json: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| ReposerveError::InvalidArgument {
                name: "webhook payload",
                value: e.to_string(),
            })?;
        let key = json
            .pointer("/repository/full_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ReposerveError::InvalidArgument {
                name: "webhook payload",
                value: "missing repository.full_name".to_string(),
            })?;

        let waiting = self.listeners().remove(key).unwrap_or_default();
        let payload = json.to_string();
        let delivered = waiting
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(payload.clone()).is_ok())
            .filter(|sent| *sent)
            .count();
        info!("webhook {} delivered to {} listeners", key, delivered);
        Ok(delivered)
    }

    /// Listeners currently waiting on `key`
    pub fn waiting(&self, key: &str) -> usize {
        self.listeners()
            .get(key)
            .map(|txs| txs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}
