//! C1: one logical MCP connection per orchestrator run.
//!
//! [`TransportSession`] performs the `initialize` handshake exactly once,
//! correlates every subsequent JSON-RPC call against the same connection,
//! and keeps an append-only transcript so probes and reports can explain
//! what was actually said over the wire.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::error::{CortexDxError, Result};
use crate::transport::client::{start_read_loop, JsonRpcClient};
use crate::transport::types::{
    ClientInfo, InitializeParams, InitializeResult, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::transport::Transport;

/// How many of the most recent exchanges the transcript retains.
const TRANSCRIPT_TAIL: usize = 200;

/// A single logged request/response pair, successful or not.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Exchange {
    /// Monotonic sequence number assigned at append time.
    pub seq: u64,
    /// The JSON-RPC method invoked.
    pub method: String,
    /// `"ok"` or `"error"`.
    pub status: String,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
}

/// Snapshot of the session's handshake and recent call history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Transcript {
    /// The negotiated `initialize` result, if the handshake has completed.
    pub initialize_result: Option<InitializeResultSummary>,
    /// The most recent [`TRANSCRIPT_TAIL`] exchanges, oldest first.
    pub recent: Vec<Exchange>,
}

/// A trimmed-down, serializable view of [`InitializeResult`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct InitializeResultSummary {
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Reported server name.
    pub server_name: String,
    /// Reported server version.
    pub server_version: String,
}

/// Options accepted by [`TransportSession::jsonrpc`].
#[derive(Debug, Clone, Default)]
pub struct JsonRpcOpts {
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
}

/// Options accepted by [`TransportSession::sse_probe`].
#[derive(Debug, Clone)]
pub struct SseProbeOpts {
    /// Upper bound on bytes read from the head of the stream.
    pub max_bytes: usize,
    /// Upper bound on wall-clock time spent reading.
    pub max_duration: Duration,
}

impl Default for SseProbeOpts {
    fn default() -> Self {
        Self {
            max_bytes: 4096,
            max_duration: Duration::from_secs(3),
        }
    }
}

/// Result of a bounded SSE head-read.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SseProbeResult {
    /// Whatever text was accumulated before the bound was hit.
    pub partial_text: String,
    /// `true` if reading stopped because `max_bytes` was reached.
    pub truncated: bool,
    /// `true` if reading stopped because `max_duration` elapsed.
    pub timed_out: bool,
}

/// Owns exactly one MCP handshake and every call made against it.
///
/// `initialize()` is idempotent and safe under concurrent callers: the first
/// caller performs the handshake, every other caller awaits the same result
/// via a [`tokio::sync::OnceCell`].
pub struct TransportSession {
    transport: Arc<dyn Transport>,
    client: Arc<JsonRpcClient>,
    _read_loop: tokio::task::JoinHandle<()>,
    cancellation: CancellationToken,
    init_gate: OnceCell<InitializeResult>,
    transcript: Arc<Mutex<TranscriptState>>,
}

struct TranscriptState {
    initialize_result: Option<InitializeResultSummary>,
    recent: VecDeque<Exchange>,
    next_seq: u64,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("initialized", &self.init_gate.initialized())
            .finish_non_exhaustive()
    }
}

impl TransportSession {
    /// Wrap a concrete transport, wiring its inbound stream into a JSON-RPC
    /// read loop and its outbound channel into `send`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        let writer_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if writer_transport.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let mut stream = reader_transport.receive();
            while let Some(item) = stream.next().await {
                if inbound_tx.send(item).is_err() {
                    break;
                }
            }
        });

        let client = Arc::new(JsonRpcClient::new(outbound_tx));
        let cancellation = CancellationToken::new();
        let read_loop = start_read_loop(inbound_rx, cancellation.clone(), client.pending_handle());

        Self {
            transport,
            client,
            _read_loop: read_loop,
            cancellation,
            init_gate: OnceCell::new(),
            transcript: Arc::new(Mutex::new(TranscriptState {
                initialize_result: None,
                recent: VecDeque::with_capacity(TRANSCRIPT_TAIL),
                next_seq: 0,
            })),
        }
    }

    /// Perform the MCP `initialize` handshake exactly once for the lifetime
    /// of this session. Concurrent callers all await the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CortexDxError::TransportFatal`] if the handshake call fails,
    /// or [`CortexDxError::ProtocolVersion`] if the server negotiates a
    /// version this crate does not support.
    pub async fn initialize(&self) -> Result<&InitializeResult> {
        self.init_gate
            .get_or_try_init(|| async {
                let params = InitializeParams {
                    protocol_version: SUPPORTED_PROTOCOL_VERSIONS[0].to_string(),
                    capabilities: serde_json::json!({}),
                    client_info: ClientInfo::default(),
                };

                let result: InitializeResult = self
                    .client
                    .call("initialize", &params, None)
                    .await
                    .map_err(|e| anyhow::anyhow!(CortexDxError::TransportFatal(e.to_string())))?;

                if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
                    return Err(anyhow::anyhow!(CortexDxError::ProtocolVersion {
                        expected: SUPPORTED_PROTOCOL_VERSIONS
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                        got: result.protocol_version.clone(),
                    }));
                }

                self.client
                    .call::<_, serde_json::Value>(
                        "notifications/initialized",
                        serde_json::json!({}),
                        Some(Duration::from_millis(1)),
                    )
                    .await
                    .ok();

                {
                    let mut t = self.transcript.lock().await;
                    t.initialize_result = Some(InitializeResultSummary {
                        protocol_version: result.protocol_version.clone(),
                        server_name: result.server_info.name.clone(),
                        server_version: result.server_info.version.clone(),
                    });
                }

                Ok(result)
            })
            .await
    }

    /// Send one JSON-RPC request, appending the outcome to the transcript.
    /// `initialize()` must have completed before calling this.
    pub async fn jsonrpc<P, R>(&self, method: &str, params: P, opts: JsonRpcOpts) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        if !self.init_gate.initialized() {
            return Err(anyhow::anyhow!(CortexDxError::Internal(
                "jsonrpc called before initialize completed".to_string()
            )));
        }

        let started = Instant::now();
        let outcome: Result<R> = self.client.call(method, params, opts.timeout).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut t = self.transcript.lock().await;
        let seq = t.next_seq;
        t.next_seq += 1;
        if t.recent.len() == TRANSCRIPT_TAIL {
            t.recent.pop_front();
        }
        t.recent.push_back(Exchange {
            seq,
            method: method.to_string(),
            status: if outcome.is_ok() { "ok" } else { "error" }.to_string(),
            latency_ms,
        });

        outcome
    }

    /// Open a streaming response and read at most a small head, decoding it
    /// as a text event stream. Used by probes inspecting `retry:`/`id:`
    /// reconnection directives; never pulls the whole stream.
    pub async fn sse_probe(&self, opts: SseProbeOpts) -> Result<SseProbeResult> {
        let mut stream = self.transport.receive();
        let deadline = Instant::now() + opts.max_duration;
        let mut buf = String::new();
        let mut truncated = false;
        let mut timed_out = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                timed_out = true;
                break;
            }
            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(chunk)) => {
                    buf.push_str(&chunk);
                    if buf.len() >= opts.max_bytes {
                        buf.truncate(opts.max_bytes);
                        truncated = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        Ok(SseProbeResult {
            partial_text: buf,
            truncated,
            timed_out,
        })
    }

    /// Snapshot of the initialize exchange and the recent call tail.
    pub async fn transcript(&self) -> Transcript {
        let t = self.transcript.lock().await;
        Transcript {
            initialize_result: t.initialize_result.clone(),
            recent: t.recent.iter().cloned().collect(),
        }
    }

    /// Stop the background read loop. Subsequent calls fail.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
