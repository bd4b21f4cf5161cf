//! MCP transport abstraction and the C1 transport session.
//!
//! This module defines the [`Transport`] trait that every concrete transport
//! implementation satisfies, plus [`TransportSession`], which owns exactly
//! one handshake per diagnostic run and correlates every subsequent JSON-RPC
//! call against it. Concrete transports live in submodules:
//!
//! - [`stdio::StdioTransport`] — spawns a child process, newline-delimited
//!   JSON over stdin/stdout.
//! - [`http::HttpTransport`] — Streamable HTTP/SSE transport.
//! - [`fake::FakeTransport`] — in-process fake used by tests (cfg(test) only).

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

pub mod client;
pub mod http;
pub mod session;
pub mod stdio;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use session::{Transcript, TransportSession};

/// Abstraction over MCP transport implementations.
///
/// Callers `send` a serialized JSON-RPC string and `receive` a stream of
/// serialized JSON-RPC strings, one per logical message. Framing and
/// reconnection are each concrete transport's responsibility.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a single, complete JSON-RPC message to the remote peer.
    async fn send(&self, message: String) -> Result<()>;

    /// Stream of inbound JSON-RPC message strings, one complete JSON object
    /// per item. Ends when the transport closes or the peer disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Stream of transport-level diagnostic strings (e.g. child stderr
    /// lines). Diagnostic output MUST NOT be treated as an error condition.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;
}
