//! Protocol layer tests over a real stdio transport
//!
//! These drive `McpProtocol` directly, below the server instance, against
//! the `mcp_test_server` helper.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mcp_host::error::McpHostError;
use mcp_host::mcp::client;
use mcp_host::mcp::protocol::{InitializedMcpProtocol, McpProtocol, ServerCapabilityFlag};
use mcp_host::mcp::transport::stdio::StdioTransport;
use mcp_host::mcp::transport::Transport;
use mcp_host::mcp::types::{Implementation, ResourceContents};

async fn open_session(
    mode: &str,
) -> (InitializedMcpProtocol, Arc<dyn Transport>, CancellationToken) {
    let exe = common::test_server_exe();
    let mut env = BTreeMap::new();
    env.insert("MCP_TEST_SERVER_MODE".to_string(), mode.to_string());

    let transport: Arc<dyn Transport> = Arc::new(
        StdioTransport::spawn(
            "helper",
            &exe.to_string_lossy(),
            &[],
            &env,
            None,
            Duration::from_secs(1),
        )
        .expect("failed to spawn mcp_test_server"),
    );
    let token = CancellationToken::new();
    let client = client::connect(
        "helper",
        Arc::clone(&transport),
        Duration::from_secs(2),
        token.clone(),
    );

    let protocol = McpProtocol::new(client)
        .initialize(
            Implementation {
                name: "mcp-host-test".to_string(),
                version: "0.0.0".to_string(),
            },
            Duration::ZERO,
        )
        .await
        .expect("handshake failed");
    (protocol, transport, token)
}

#[tokio::test]
async fn test_handshake_reports_capabilities_and_server_info() {
    let (protocol, transport, token) = open_session("normal").await;

    assert!(protocol.capable(ServerCapabilityFlag::Tools));
    assert!(protocol.capable(ServerCapabilityFlag::Resources));
    assert!(protocol.capable(ServerCapabilityFlag::Prompts));
    assert!(!protocol.capable(ServerCapabilityFlag::Logging));
    assert_eq!(
        protocol.server_info().map(|i| i.name.as_str()),
        Some("mcp-test-server")
    );

    protocol.ping().await.unwrap();

    token.cancel();
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_discover_fills_every_catalog() {
    let (protocol, transport, token) = open_session("normal").await;

    let discovery = protocol.discover().await;
    assert_eq!(discovery.tools.len(), 4);
    assert_eq!(discovery.resources[0].uri, "memo://readme");
    let args = discovery.prompts[0].arguments.as_ref().unwrap();
    assert_eq!(args[0].name, "who");

    let contents = protocol.read_resource("memo://readme").await.unwrap();
    assert!(matches!(&contents[0], ResourceContents::Text(t) if t.mime_type.as_deref() == Some("text/plain")));

    token.cancel();
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_list_failure_surfaces_from_list_but_not_discover() {
    let (protocol, transport, token) = open_session("broken-list").await;

    let err = protocol.list_tools().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::Rpc { code: -32603, .. })
    ));

    let discovery = protocol.discover().await;
    assert!(discovery.tools.is_empty());
    assert_eq!(discovery.prompts.len(), 1);

    token.cancel();
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_tool_error_flag_is_a_successful_call() {
    let (protocol, transport, token) = open_session("normal").await;

    let response = protocol.call_tool("fail", None).await.unwrap();
    assert_eq!(response.is_error, Some(true));

    token.cancel();
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_requests_after_close_fail_without_hanging() {
    let (protocol, transport, token) = open_session("normal").await;
    transport.close().await.unwrap();

    let started = tokio::time::Instant::now();
    let outcome = protocol.ping().await;
    assert!(outcome.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));

    token.cancel();
}
