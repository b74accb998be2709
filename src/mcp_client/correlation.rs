//! Request/response correlation for the stdio transport.
//!
//! Each outstanding request owns one entry in an `id → oneshot` table. The
//! stdout reader hands every decoded message to [`PendingRequests::dispatch`];
//! only the entry whose id matches is completed and removed.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use super::types::JsonRpcResponse;

/// Outstanding requests of one connection, keyed by request id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<PendingState>,
}

#[derive(Debug, Default)]
struct PendingState {
    waiters: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    /// Set once the reader has hit EOF; no further registrations succeed.
    closed: bool,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. Must happen before the request is written.
    ///
    /// Returns `None` when the stream has already closed.
    pub async fn register(&self, id: u64) -> Option<oneshot::Receiver<JsonRpcResponse>> {
        let mut state = self.inner.lock().await;
        if state.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Some(rx)
    }

    /// Route an incoming message to its waiter.
    ///
    /// Returns `true` if a waiter was completed. Messages without a matching
    /// registration (late responses, notifications) are ignored.
    pub async fn dispatch(&self, message: JsonRpcResponse) -> bool {
        let Some(id) = message.response_id() else {
            return false;
        };
        let waiter = self.inner.lock().await.waiters.remove(&id);
        match waiter {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                tracing::trace!(id, "response with no pending request");
                false
            }
        }
    }

    /// Deregister `id` without completing it (timeout or write failure).
    pub async fn cancel(&self, id: u64) -> bool {
        self.inner.lock().await.waiters.remove(&id).is_some()
    }

    /// Mark the stream closed and drop every waiter, waking them with
    /// `RecvError`.
    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        state.closed = true;
        state.waiters.clear();
    }

    /// Number of requests still waiting.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.waiters.len()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
