//! End-to-end test of C1 over a real child process: spawns the
//! `mcp_test_server` fixture binary, drives it through `TransportSession`,
//! and checks the handshake-once and JSON-RPC round-trip behavior against a
//! process that only speaks newline-delimited JSON on stdio.

mod common;

use std::collections::HashMap;

use cortexdx::transport::session::{JsonRpcOpts, TransportSession};
use cortexdx::transport::stdio::StdioTransport;

fn spawn_session() -> TransportSession {
    let exe = common::mcp_test_server_exe();
    let transport = StdioTransport::spawn(exe, Vec::new(), HashMap::new(), None).expect("failed to spawn mcp_test_server");
    TransportSession::new(std::sync::Arc::new(transport))
}

#[tokio::test]
async fn initialize_negotiates_and_tools_list_round_trips() {
    let session = spawn_session();

    let result = session.initialize().await.expect("initialize failed");
    assert_eq!(result.protocol_version, "2025-11-25");
    assert_eq!(result.server_info.name, "mcp-test-server");

    let tools: serde_json::Value = session
        .jsonrpc("tools/list", serde_json::json!({}), JsonRpcOpts::default())
        .await
        .expect("tools/list failed");
    let tools = tools["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "echo");
}

#[tokio::test]
async fn tools_call_echoes_message() {
    let session = spawn_session();
    session.initialize().await.expect("initialize failed");

    let result: serde_json::Value = session
        .jsonrpc(
            "tools/call",
            serde_json::json!({"name": "echo", "arguments": {"message": "hello cortexdx"}}),
            JsonRpcOpts::default(),
        )
        .await
        .expect("tools/call failed");

    assert_eq!(result["content"][0]["text"], "hello cortexdx");
    assert_eq!(result["isError"], false);
}

#[tokio::test]
async fn initialize_is_idempotent_across_concurrent_callers() {
    let session = std::sync::Arc::new(spawn_session());

    let a = std::sync::Arc::clone(&session);
    let b = std::sync::Arc::clone(&session);
    let (ra, rb) = tokio::join!(tokio::spawn(async move { a.initialize().await.unwrap().protocol_version.clone() }), tokio::spawn(async move { b.initialize().await.unwrap().protocol_version.clone() }));
    assert_eq!(ra.unwrap(), "2025-11-25");
    assert_eq!(rb.unwrap(), "2025-11-25");
}

#[tokio::test]
async fn unknown_method_surfaces_as_jsonrpc_error() {
    let session = spawn_session();
    session.initialize().await.expect("initialize failed");

    let outcome: cortexdx::error::Result<serde_json::Value> = session.jsonrpc("not/a/real/method", serde_json::json!({}), JsonRpcOpts::default()).await;
    assert!(outcome.is_err());
}
