//! Stdio server lifecycle tests against the `mcp_test_server` helper
//!
//! Each test launches the helper binary as a child process through the
//! manager and drives it over real pipes: handshake, discovery, calls,
//! notifications, crashes and shutdown.

mod common;

use std::time::Duration;

use common::{fast_settings, temp_manager, test_server_config};
use mcp_host::error::McpHostError;
use mcp_host::mcp::status::ServerState;
use mcp_host::mcp::types::{ResourceContents, ToolResponseContent};
use mcp_host::mcp::manager::McpServerManager;

/// Poll a server's status until `check` holds or the deadline passes.
async fn wait_for_status(
    manager: &McpServerManager,
    name: &str,
    check: impl Fn(&mcp_host::ServerStatus) -> bool,
) -> mcp_host::ServerStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = manager
            .get_server_status(name)
            .unwrap()
            .expect("server should have a status");
        if check(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for status, last: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_start_discovers_tools_resources_and_prompts() {
    let (manager, _dir) = temp_manager(fast_settings());
    let config = test_server_config("helper", "normal");

    let status = manager.start_server(&config).await.unwrap();

    assert_eq!(status.state, ServerState::Running);
    assert!(status.pid.is_some());
    let names: Vec<&str> = status.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "fail", "grow", "crash"]);
    assert_eq!(status.resources.len(), 1);
    assert_eq!(status.prompts[0].name, "greet");
    assert_eq!(status.server_info.unwrap().name, "mcp-test-server");

    manager.stop_all().await;
}

#[tokio::test]
async fn test_call_echo_and_read_resource() {
    let (manager, _dir) = temp_manager(fast_settings());
    manager
        .start_server(&test_server_config("helper", "normal"))
        .await
        .unwrap();

    let response = manager
        .call_tool(
            "helper",
            "echo",
            Some(serde_json::json!({"message": "hello"})),
        )
        .await
        .unwrap();
    assert_eq!(
        response.content,
        vec![ToolResponseContent::Text {
            text: "hello".to_string()
        }]
    );
    assert_eq!(response.is_error, Some(false));

    let contents = manager.get_resource("helper", "memo://readme").await.unwrap();
    match &contents[0] {
        ResourceContents::Text(text) => assert_eq!(text.text, "hello from the test server"),
        other => panic!("expected text contents, got {other:?}"),
    }

    manager.stop_all().await;
}

#[tokio::test]
async fn test_rpc_error_reaches_the_caller_only() {
    let (manager, _dir) = temp_manager(fast_settings());
    manager
        .start_server(&test_server_config("helper", "normal"))
        .await
        .unwrap();

    let err = manager
        .call_tool("helper", "no-such-tool", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::Rpc { code: -32602, .. })
    ));

    let err = manager
        .get_resource("helper", "memo://missing")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::Rpc { .. })
    ));

    // The server is unaffected.
    assert_eq!(manager.running_servers(), vec!["helper"]);
    manager.stop_all().await;
}

#[tokio::test]
async fn test_non_json_stdout_lines_are_tolerated() {
    let (manager, _dir) = temp_manager(fast_settings());
    let status = manager
        .start_server(&test_server_config("noisy", "noisy"))
        .await
        .unwrap();
    assert_eq!(status.state, ServerState::Running);
    assert_eq!(status.tools.len(), 4);
    manager.stop_all().await;
}

#[tokio::test]
async fn test_exit_before_handshake_fails_and_leaves_no_instance() {
    let (manager, _dir) = temp_manager(fast_settings());

    let err = manager
        .start_server(&test_server_config("dead", "exit"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::Handshake { .. })
    ));
    assert!(manager.running_servers().is_empty());
    // Not persisted and no live instance: nothing to report.
    assert!(manager.get_server_status("dead").unwrap().is_none());
}

#[tokio::test]
async fn test_silent_peer_times_out_the_handshake() {
    let (manager, _dir) = temp_manager(fast_settings());

    let err = manager
        .start_server(&test_server_config("mute", "silent"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::HandshakeTimeout { seconds: 2, .. })
    ));
    assert!(manager.get_server_status("mute").unwrap().is_none());
}

#[tokio::test]
async fn test_failed_tool_listing_degrades_to_empty_catalog() {
    let (manager, _dir) = temp_manager(fast_settings());
    let status = manager
        .start_server(&test_server_config("broken", "broken-list"))
        .await
        .unwrap();

    assert_eq!(status.state, ServerState::Running);
    assert!(status.tools.is_empty());
    assert_eq!(status.resources.len(), 1);
    manager.stop_all().await;
}

#[tokio::test]
async fn test_list_changed_notification_refreshes_tools() {
    let (manager, _dir) = temp_manager(fast_settings());
    manager
        .start_server(&test_server_config("helper", "normal"))
        .await
        .unwrap();

    manager.call_tool("helper", "grow", None).await.unwrap();

    let status = wait_for_status(&manager, "helper", |s| {
        s.tools.iter().any(|t| t.name == "late")
    })
    .await;
    assert_eq!(status.state, ServerState::Running);
    assert_eq!(status.tools.len(), 5);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_crash_moves_server_to_error_with_stderr() {
    let (manager, _dir) = temp_manager(fast_settings());
    manager
        .start_server(&test_server_config("helper", "normal"))
        .await
        .unwrap();
    let mut events = manager.subscribe();

    // The request itself is left to time out; the status change is the signal.
    let pending = {
        let manager = std::sync::Arc::clone(&manager);
        tokio::spawn(async move { manager.call_tool("helper", "crash", None).await })
    };

    let status = wait_for_status(&manager, "helper", |s| s.state == ServerState::Error).await;
    let error = status.error.unwrap();
    assert!(error.contains("exited with status 5"), "got: {error}");

    let mut saw_error_event = false;
    while let Ok(event) = events.try_recv() {
        if event.name == "helper" && event.state == ServerState::Error {
            saw_error_event = true;
        }
    }
    assert!(saw_error_event);

    let outcome = pending.await.unwrap();
    assert!(matches!(
        outcome.unwrap_err().downcast_ref::<McpHostError>(),
        Some(McpHostError::Timeout { .. })
    ));

    // A crashed instance is stale and may be replaced.
    let restarted = manager
        .start_server(&test_server_config("helper", "normal"))
        .await
        .unwrap();
    assert_eq!(restarted.state, ServerState::Running);
    manager.stop_all().await;
}

#[tokio::test]
async fn test_second_start_is_rejected_and_stop_is_idempotent() {
    let (manager, _dir) = temp_manager(fast_settings());
    let config = test_server_config("helper", "normal");
    manager.start_server(&config).await.unwrap();

    let err = manager.start_server(&config).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::AlreadyRunning(name)) if name == "helper"
    ));

    manager.stop_server("helper").await.unwrap();
    manager.stop_server("helper").await.unwrap();
    manager.stop_server("never-existed").await.unwrap();
    assert!(manager.running_servers().is_empty());

    let err = manager.call_tool("helper", "echo", None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::NotFound(_))
    ));
}
