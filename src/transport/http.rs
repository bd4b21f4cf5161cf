//! Streamable HTTP/SSE transport (MCP `2025-11-25` revision).
//!
//! Every outbound JSON-RPC message is sent as an HTTP POST. The server may
//! reply with `application/json` (a direct body), `text/event-stream` (an SSE
//! stream carrying one or more JSON-RPC messages), or `202 Accepted` with no
//! body for notification acknowledgements.
//!
//! After a successful `initialize` POST the server MAY return an
//! `MCP-Session-Id` header; when present it is attached to every later POST.
//! A `404` while a session is active clears the session and is surfaced as a
//! transient transport error — the caller's retry (through the rate limiter)
//! decides whether to re-handshake.
//!
//! SSE `id:` fields are retained as the last event ID so a probe that
//! reconnects mid-stream resumes with `Last-Event-ID`, matching the
//! replay semantics the MCP spec requires of conforming clients.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{CortexDxError, Result};
use crate::transport::Transport;

const MCP_PROTOCOL_VERSION: &str = crate::transport::types::LATEST_PROTOCOL_VERSION;

/// Streamable HTTP/SSE transport implementing the `2025-11-25` MCP revision.
#[derive(Debug)]
pub struct HttpTransport {
    http_client: Arc<reqwest::Client>,
    endpoint: url::Url,
    session_id: Arc<RwLock<Option<String>>>,
    headers: HashMap<String, String>,
    response_tx: mpsc::UnboundedSender<String>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    last_event_id: Arc<RwLock<Option<String>>>,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. `headers` are merged into
    /// every request (bearer tokens, API keys); `timeout` bounds each
    /// individual HTTP request. No network I/O happens at construction time.
    pub fn new(endpoint: url::Url, headers: HashMap<String, String>, timeout: Duration) -> Self {
        let http_client = Arc::new(
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build reqwest client"),
        );

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Self {
            http_client,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            headers,
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            error_tx,
            error_rx: Arc::new(Mutex::new(error_rx)),
            last_event_id: Arc::new(RwLock::new(None)),
        }
    }

    /// Last SSE event ID observed, if any — used by C1's `sseProbe`
    /// resumption check.
    pub async fn last_event_id(&self) -> Option<String> {
        self.last_event_id.read().await.clone()
    }

    /// Active MCP session ID, if the server issued one.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: String) -> Result<()> {
        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION)
            .body(message);

        {
            let sid = self.session_id.read().await;
            if let Some(ref id) = *sid {
                req = req.header("MCP-Session-Id", id.as_str());
            }
        }
        {
            let lei = self.last_event_id.read().await;
            if let Some(ref id) = *lei {
                req = req.header("Last-Event-ID", id.as_str());
            }
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| anyhow::anyhow!(CortexDxError::TransportTransient(format!("HTTP POST failed: {e}"))))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_auth = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(anyhow::anyhow!(CortexDxError::Auth(www_auth)));
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let has_session = self.session_id.read().await.is_some();
            if has_session {
                *self.session_id.write().await = None;
                return Err(anyhow::anyhow!(CortexDxError::TransportTransient(
                    "mcp session expired".into()
                )));
            }
            return Err(anyhow::anyhow!(CortexDxError::TransportTransient(
                "HTTP 404 Not Found".into()
            )));
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(anyhow::anyhow!(CortexDxError::TransportTransient(format!(
                "HTTP POST returned status {status}"
            ))));
        }

        if let Some(new_session_id) = response
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let response_tx = self.response_tx.clone();
            let last_event_id = Arc::clone(&self.last_event_id);
            tokio::spawn(async move {
                parse_sse_stream(byte_stream, response_tx, last_event_id).await;
            });
        } else {
            let body = response.text().await.map_err(|e| {
                anyhow::anyhow!(CortexDxError::TransportTransient(format!(
                    "failed to read response body: {e}"
                )))
            })?;
            if !body.is_empty() {
                let _ = self.response_tx.send(body);
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.response_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.error_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }
}

impl Drop for HttpTransport {
    /// Best-effort spec-required session termination: a synchronous DELETE
    /// with `MCP-Session-Id` on a separate thread, since `drop` cannot await.
    fn drop(&mut self) {
        let session_id = match self.session_id.try_read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };

        if let Some(sid) = session_id {
            let endpoint = self.endpoint.as_str().to_string();
            let mut extra_headers = self.headers.clone();
            extra_headers.insert("MCP-Session-Id".to_string(), sid);
            let _ = self.error_tx.send(format!("terminating session at {endpoint}"));

            let _ = std::thread::spawn(move || {
                if let Ok(client) = reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                {
                    let mut req = client.delete(&endpoint);
                    for (k, v) in &extra_headers {
                        req = req.header(k.as_str(), v.as_str());
                    }
                    let _ = req.send();
                }
            });
        }
    }
}

/// Parse an SSE byte stream and forward complete `data:` events to
/// `response_tx`. Intended to run inside a `tokio::spawn`.
pub async fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    response_tx: mpsc::UnboundedSender<String>,
    last_event_id: Arc<RwLock<Option<String>>>,
) {
    use futures::StreamExt;

    let mut buffer = String::new();
    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(_) => break,
        };
        let text = match std::str::from_utf8(&chunk) {
            Ok(s) => s.to_string(),
            Err(_) => continue,
        };
        buffer.push_str(&text);

        while let Some(pos) = buffer.find("\n\n") {
            let event_block = buffer[..pos].to_string();
            buffer = buffer[pos + 2..].to_string();
            process_sse_event(&event_block, &response_tx, &last_event_id).await;
        }
    }

    if !buffer.is_empty() {
        process_sse_event(&buffer, &response_tx, &last_event_id).await;
    }
}

async fn process_sse_event(
    event_block: &str,
    response_tx: &mpsc::UnboundedSender<String>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;
    let mut event_id: Option<&str> = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            event_id = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
    }

    if let Some(id) = event_id {
        *last_event_id.write().await = Some(id.to_string());
    }

    if let Some(et) = event_type {
        if et.eq_ignore_ascii_case("ping") {
            return;
        }
    }

    let data = data_lines.join("\n");
    if data.eq_ignore_ascii_case("[ping]") || data.is_empty() {
        return;
    }
    let _ = response_tx.send(data);
}
