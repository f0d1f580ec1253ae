//! Small in-memory relays that share no state with the file pipeline
//!
//! - `tmp`: short-lived blobs, e.g. for drag and drop between clients
//! - `webhook`: forwards pushed webhook payloads to long-polling listeners

pub mod tmp;
pub mod webhook;

pub use tmp::TempStore;
pub use webhook::WebhookRelay;
