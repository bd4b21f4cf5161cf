//! Transport-agnostic async JSON-RPC 2.0 client.
//!
//! [`JsonRpcClient`] is a channel-backed JSON-RPC 2.0 client decoupled from the
//! underlying transport. A concrete [`super::Transport`] implementation wires
//! up two [`tokio::sync::mpsc`] channels (one outbound, one inbound); the
//! client then drives request/response correlation and the caller calls
//! [`start_read_loop`] once to process inbound traffic.
//!
//! In-flight requests are tracked in a `pending` map keyed by request ID, each
//! entry a [`oneshot::Sender`] resolved by the read loop when a matching
//! response arrives. A [`tokio_util::sync::CancellationToken`] stops the read
//! loop cleanly and drops all pending senders so in-flight callers receive an
//! error rather than hang.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{CortexDxError, Result};
use crate::transport::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Default timeout applied to a call when the caller does not specify one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// The pending-response map: request ID to the oneshot sender awaiting it.
pub(crate) type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Transport-agnostic async JSON-RPC 2.0 client.
///
/// Create one with [`JsonRpcClient::new`], passing the outbound channel
/// sender. Call [`start_read_loop`] to process incoming messages, then issue
/// calls with [`JsonRpcClient::call`].
pub struct JsonRpcClient {
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<PendingMap>>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a new client. The caller wires `outbound_rx` to a transport
    /// writer and calls [`start_read_loop`] with the matching inbound receiver.
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
        }
    }

    /// Issue a JSON-RPC request and await the typed result.
    ///
    /// # Errors
    ///
    /// Returns [`CortexDxError::TransportTransient`] if the outbound channel
    /// is closed or the read loop exits before a response arrives. Returns
    /// [`CortexDxError::Timeout`] if no response arrives within `timeout`
    /// (defaulting to [`DEFAULT_CALL_TIMEOUT`]). Returns
    /// [`CortexDxError::JsonRpc`] if the peer returns an error response.
    pub async fn call<P, R>(&self, method: &str, params: P, timeout: Option<Duration>) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        })?;

        self.outbound_tx.send(message).map_err(|_| {
            CortexDxError::TransportTransient("outbound channel closed".to_string())
        })?;

        let deadline = timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        let outcome = tokio::time::timeout(deadline, rx).await.map_err(|_| {
            // Clean up the now-orphaned pending slot.
            let pending = Arc::clone(&self.pending);
            tokio::spawn(async move {
                pending.lock().await.remove(&id);
            });
            CortexDxError::Timeout(format!("method '{method}' timed out after {deadline:?}"))
        })?;

        let rpc_result = outcome.map_err(|_| {
            CortexDxError::TransportTransient(
                "read loop exited before a response arrived".to_string(),
            )
        })?;

        let value = rpc_result.map_err(|e| CortexDxError::JsonRpc {
            code: e.code,
            message: e.message,
        })?;

        serde_json::from_value(value).map_err(|e| CortexDxError::Serialization(e).into())
    }

    /// Number of calls still awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// Classifies each inbound JSON string as a response (has `id` and `result`
/// or `error`) and resolves the matching pending sender. Any other shape is
/// logged and discarded — a diagnostic session only ever originates calls, it
/// never serves server-initiated requests or needs to bind notification
/// handlers.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    pending: Arc<Mutex<PendingMap>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    pending.lock().await.clear();
                    break;
                }

                maybe_msg = inbound_rx.recv() => {
                    let raw = match maybe_msg {
                        Some(s) => s,
                        None => {
                            pending.lock().await.clear();
                            break;
                        }
                    };
                    dispatch_response(&raw, &pending).await;
                }
            }
        }
    })
}

impl JsonRpcClient {
    /// Access the shared pending map so a caller can hand it to
    /// [`start_read_loop`] without exposing internal mutability elsewhere.
    pub fn pending_handle(&self) -> Arc<Mutex<PendingMap>> {
        Arc::clone(&self.pending)
    }
}

async fn dispatch_response(raw: &str, pending: &Arc<Mutex<PendingMap>>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("transport read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    let id_val = &value["id"];
    let id: u64 = if let Some(n) = id_val.as_u64() {
        n
    } else if let Some(s) = id_val.as_str() {
        match s.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                tracing::debug!("transport read loop: non-integer id {id_val}, ignoring");
                return;
            }
        }
    } else {
        tracing::debug!("transport read loop: message has no usable id, ignoring");
        return;
    };

    let tx = pending.lock().await.remove(&id);
    let Some(tx) = tx else {
        tracing::debug!("transport read loop: response for unknown id {id}, ignoring");
        return;
    };

    let outcome: std::result::Result<serde_json::Value, JsonRpcError> =
        if let Some(error_val) = value.get("error") {
            match serde_json::from_value::<JsonRpcError>(error_val.clone()) {
                Ok(e) => Err(e),
                Err(_) => Err(JsonRpcError {
                    code: -32603,
                    message: format!("malformed error object: {error_val}"),
                    data: None,
                }),
            }
        } else {
            Ok(value.get("result").cloned().unwrap_or(serde_json::Value::Null))
        };

    let _ = tx.send(outcome);
}
