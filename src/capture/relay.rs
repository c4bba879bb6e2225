//! Correlated request/reply relay to the in-page capture agent.
//!
//! Requests go out through a [`BridgeTransport`]; replies come back through
//! [`BlobRelay::dispatch`], which whoever listens to the page calls for every
//! inbound message. Each request waits on its own oneshot, keyed by a fresh
//! correlation id, so replies can never be confused even if several are in
//! flight.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use crate::capture::protocol::{BridgeMessage, UNKNOWN_KEY};
use crate::error::CaptureError;

/// Outbound half of the bridge.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    async fn post(&self, message: &BridgeMessage) -> Result<(), CaptureError>;
}

type Reply = Result<Vec<u8>, CaptureError>;

struct PendingRequest {
    key: String,
    issued_at: Instant,
    reply: oneshot::Sender<Reply>,
}

pub struct BlobRelay<T> {
    transport: T,
    timeout: Duration,
    pending: Mutex<HashMap<String, PendingRequest>>,
    captures_tx: mpsc::UnboundedSender<String>,
    captures_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl<T: BridgeTransport> BlobRelay<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        let (captures_tx, captures_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            timeout,
            pending: Mutex::new(HashMap::new()),
            captures_tx,
            captures_rx: Mutex::new(captures_rx),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch and consume the content held under `key`.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, CaptureError> {
        self.fetch_with_id(uuid::Uuid::new_v4().to_string(), key).await
    }

    pub async fn fetch_with_id(&self, correlation_id: String, key: &str) -> Result<Vec<u8>, CaptureError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&correlation_id) {
                return Err(CaptureError::DuplicateRequest(correlation_id));
            }
            pending.insert(
                correlation_id.clone(),
                PendingRequest {
                    key: key.to_string(),
                    issued_at: Instant::now(),
                    reply: tx,
                },
            );
        }

        let request = BridgeMessage::FetchBlob {
            correlation_id: correlation_id.clone(),
            key: key.to_string(),
        };
        if let Err(e) = self.transport.post(&request).await {
            self.pending.lock().await.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(CaptureError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&correlation_id);
                warn!(%correlation_id, key, "Capture request timed out");
                Err(CaptureError::Timeout {
                    what: format!("content of {key}"),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Route one inbound message. Replies with no matching request are dropped.
    pub async fn dispatch(&self, message: BridgeMessage) {
        match message {
            BridgeMessage::BlobResult {
                correlation_id,
                bytes,
                error,
            } => {
                let Some(request) = self.pending.lock().await.remove(&correlation_id) else {
                    debug!(%correlation_id, "Ignoring reply with no pending request");
                    return;
                };
                let reply = match (bytes, error) {
                    (_, Some(e)) if e == UNKNOWN_KEY => Err(CaptureError::UnknownKey(request.key.clone())),
                    (_, Some(e)) => Err(CaptureError::Agent(e)),
                    (Some(bytes), None) => Ok(bytes),
                    (None, None) => Err(CaptureError::Decode("reply carried no content".into())),
                };
                debug!(
                    %correlation_id,
                    key = %request.key,
                    elapsed_ms = request.issued_at.elapsed().as_millis() as u64,
                    ok = reply.is_ok(),
                    "Capture reply"
                );
                // The requester may have given up already.
                let _ = request.reply.send(reply);
            }
            BridgeMessage::BlobCaptured { key } => {
                debug!(%key, "Capture notification");
                let _ = self.captures_tx.send(key);
            }
            BridgeMessage::FetchBlob { .. } => {}
        }
    }

    /// Wait for the page to mint the next capture handle.
    pub async fn next_capture(&self, timeout: Duration) -> Result<String, CaptureError> {
        let mut rx = self.captures_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(key)) => Ok(key),
            Ok(None) => Err(CaptureError::Closed),
            Err(_) => Err(CaptureError::Timeout {
                what: "a capture notification".into(),
                timeout,
            }),
        }
    }

    /// Discard notifications left over from earlier entries.
    pub async fn drain_captures(&self) -> usize {
        let mut rx = self.captures_rx.lock().await;
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Fail every outstanding request. Called when the session ends.
    pub async fn close(&self) {
        let mut pending = self.pending.lock().await;
        for (_, request) in pending.drain() {
            let _ = request.reply.send(Err(CaptureError::Closed));
        }
    }
}
