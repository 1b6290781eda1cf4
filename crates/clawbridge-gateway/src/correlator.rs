//! Request/response correlation over the upstream link.
//!
//! Each request gets a fresh identifier and a oneshot channel. The matching
//! response resolves it; otherwise it fails on timeout or when the link drops.

use crate::error::BridgeError;
use crate::link::LinkState;
use crate::protocol::{RequestFrame, ResponseFrame};
use crate::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type Completion = oneshot::Sender<Result<Value>>;
type Reply = oneshot::Receiver<Result<Value>>;

/// An outstanding request.
struct PendingRequest {
    method: String,
    created_at: Instant,
    tx: Completion,
}

/// Tracks outstanding upstream requests.
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    timeout: Duration,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Correlator {
    /// Create a correlator with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Send a request over `link` and wait for its response.
    ///
    /// Fails with `NotConnected` when the link has no open transport at call
    /// time or is lost while waiting, `Timeout` when nothing arrives in time,
    /// and `Remote` when upstream answers `ok: false`.
    pub async fn send(&self, link: &LinkState, method: &str, params: Value) -> Result<Value> {
        let (id, mut rx) = self.register(link, method, params)?;
        let _guard = PendingGuard { correlator: self, id: &id };
        self.wait(&id, method, &mut rx).await
    }

    /// Write a request now and return a handle for its response.
    ///
    /// The request is on the wire when this returns, so requests started one
    /// after another reach upstream in that order however their replies are
    /// awaited.
    pub fn start(
        self: &Arc<Self>,
        link: &LinkState,
        method: &str,
        params: Value,
    ) -> Result<PendingReply> {
        let (id, rx) = self.register(link, method, params)?;
        Ok(PendingReply {
            correlator: self.clone(),
            id,
            method: method.to_string(),
            rx,
        })
    }

    fn register(&self, link: &LinkState, method: &str, params: Value) -> Result<(String, Reply)> {
        let id = uuid::Uuid::new_v4().to_string();
        let text = RequestFrame::new(&id, method, &params).to_text()?;
        let (tx, rx) = oneshot::channel();

        {
            // The link is checked under the registry lock so a concurrent
            // flush either sees this entry or this call sees the link gone.
            let mut pending = self.pending.lock();
            let sender = link.sender().ok_or(BridgeError::NotConnected)?;
            if sender.send(text).is_err() {
                return Err(BridgeError::NotConnected);
            }
            pending.insert(
                id.clone(),
                PendingRequest {
                    method: method.to_string(),
                    created_at: Instant::now(),
                    tx,
                },
            );
        }
        debug!(id = %id, method, "Sent upstream request");
        Ok((id, rx))
    }

    async fn wait(&self, id: &str, method: &str, rx: &mut Reply) -> Result<Value> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without an answer: the entry was discarded.
            Ok(Err(_)) => Err(BridgeError::NotConnected),
            Err(_) => {
                warn!(id = %id, method, "Upstream request timed out");
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Complete the request a response belongs to.
    ///
    /// Returns false for unknown identifiers (already timed out, or never
    /// ours); those are ignored.
    pub fn resolve(&self, response: ResponseFrame) -> bool {
        let Some(entry) = self.pending.lock().remove(&response.id) else {
            debug!(id = %response.id, "Ignoring response for unknown request");
            return false;
        };

        debug!(
            id = %response.id,
            method = %entry.method,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            ok = response.ok,
            "Upstream response"
        );
        let _ = entry.tx.send(response.into_result());
        true
    }

    /// Fail every outstanding request with `NotConnected` and empty the
    /// registry. Returns how many were failed.
    pub fn flush(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(BridgeError::NotConnected));
        }
        if count > 0 {
            debug!(count, "Flushed pending upstream requests");
        }
        count
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn discard(&self, id: &str) {
        self.pending.lock().remove(id);
    }
}

/// A request already written upstream, awaiting its response.
///
/// Dropping it discards the registry entry.
pub struct PendingReply {
    correlator: Arc<Correlator>,
    id: String,
    method: String,
    rx: Reply,
}

impl PendingReply {
    /// Wait for the response, with the same outcomes as [`Correlator::send`].
    pub async fn wait(mut self) -> Result<Value> {
        let correlator = self.correlator.clone();
        correlator.wait(&self.id, &self.method, &mut self.rx).await
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.discard(&self.id);
    }
}

/// Removes the entry when the waiting call ends for any reason, including
/// timeout and the caller dropping the future.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.discard(self.id);
    }
}
