//! In-process fake transport for tests.
//!
//! Create with [`FakeTransport::new`] to obtain a `(FakeTransport,
//! FakeTransportHandle)` pair: wire the transport into the code under test
//! and drive it from the test side via the handle — read what the client
//! sent with `handle.outbound_rx`, inject server responses with
//! `handle.inbound_tx`.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::Result;
use crate::transport::Transport;

/// In-process fake transport driven entirely by in-memory channels.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    inbound_inject_tx: mpsc::UnboundedSender<String>,
}

/// Test-side handle paired with a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// What the client under test sent, drained here.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Inject a server response; the client receives it via `receive()`.
    pub inbound_tx: mpsc::UnboundedSender<String>,
}

impl FakeTransport {
    /// Create a new transport/handle pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let inbound_inject_tx = inbound_tx.clone();
        (
            Self {
                outbound_tx,
                inbound_rx: Arc::new(Mutex::new(inbound_rx)),
                inbound_inject_tx,
            },
            FakeTransportHandle {
                outbound_rx,
                inbound_tx,
            },
        )
    }

    /// Inject a pre-built JSON value as an inbound message without going
    /// through the handle.
    pub fn inject_response(&self, value: serde_json::Value) -> Result<()> {
        let s = serde_json::to_string(&value)?;
        self.inbound_inject_tx
            .send(s)
            .map_err(|e| anyhow::anyhow!("fake transport inject failed: {e}"))
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx
            .send(message)
            .map_err(|e| anyhow::anyhow!("fake transport outbound closed: {e}"))
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn send_is_observable_via_handle() {
        let (transport, mut handle) = FakeTransport::new();
        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn injected_response_is_received() {
        let (transport, handle) = FakeTransport::new();
        handle.inbound_tx.send("world".to_string()).unwrap();
        let received = transport.receive().next().await.unwrap();
        assert_eq!(received, "world");
    }

    #[tokio::test]
    async fn inject_response_serializes_value() {
        let (transport, _handle) = FakeTransport::new();
        transport
            .inject_response(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
            .unwrap();
        let received = transport.receive().next().await.unwrap();
        assert!(received.contains("\"result\""));
    }
}
