//! Integration layer tests: the tool registry follows live servers

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_settings, temp_manager, test_server_config, test_server_exe};
use mcp_host::catalog::{Catalog, CatalogEntry, InstallOptions, Requirement};
use mcp_host::error::McpHostError;
use mcp_host::integration::McpIntegration;
use mcp_host::mcp::config::ServerConfig;
use mcp_host::mcp::status::ServerState;
use mcp_host::tools::{InMemoryToolRegistry, ToolRegistry};
use tempfile::TempDir;

fn wired() -> (McpIntegration, Arc<InMemoryToolRegistry>, TempDir) {
    let (manager, dir) = temp_manager(fast_settings());
    let registry = Arc::new(InMemoryToolRegistry::new());
    let integration = McpIntegration::new(manager, registry.clone());
    (integration, registry, dir)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_add_server_registers_its_tools() {
    let (integration, registry, _dir) = wired();

    let status = integration
        .add_server(test_server_config("helper", "normal"))
        .await
        .unwrap();

    assert_eq!(status.state, ServerState::Running);
    assert_eq!(registry.list(), vec!["crash", "echo", "fail", "grow"]);
    assert_eq!(integration.registered_tools()["helper"].len(), 4);

    let result = integration
        .call_tool("echo", serde_json::json!({"message": "through the registry"}))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, "through the registry");
    assert_eq!(result.metadata["server"], "helper");

    let result = integration
        .call_tool("fail", serde_json::json!({}))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("something went wrong"));

    integration.shutdown().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_failed_add_keeps_config_and_registers_nothing() {
    let (integration, registry, _dir) = wired();

    let err = integration
        .add_server(test_server_config("dead", "exit"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::Handshake { .. })
    ));
    assert!(registry.is_empty());
    assert!(integration.manager().get_config("dead").is_ok());
}

#[tokio::test]
async fn test_update_restarts_running_server_with_new_config() {
    let (integration, registry, _dir) = wired();
    integration
        .add_server(test_server_config("helper", "normal"))
        .await
        .unwrap();
    assert_eq!(registry.len(), 4);

    integration
        .update_server(test_server_config("helper", "broken-list"))
        .await
        .unwrap();

    let status = integration
        .manager()
        .get_server_status("helper")
        .unwrap()
        .unwrap();
    assert_eq!(status.state, ServerState::Running);
    assert!(status.tools.is_empty());
    assert!(registry.is_empty());

    let mut disabled = test_server_config("helper", "normal");
    disabled.enabled = false;
    integration.update_server(disabled).await.unwrap();
    assert!(integration.manager().running_servers().is_empty());

    integration.shutdown().await;
}

#[tokio::test]
async fn test_remove_server_stops_and_forgets() {
    let (integration, registry, _dir) = wired();
    integration
        .add_server(test_server_config("helper", "normal"))
        .await
        .unwrap();

    integration.remove_server("helper").await.unwrap();

    assert!(registry.is_empty());
    assert!(integration.manager().running_servers().is_empty());
    assert!(integration.manager().get_config("helper").is_err());
}

#[tokio::test]
async fn test_tool_name_conflict_keeps_first_server() {
    let (integration, registry, _dir) = wired();
    integration
        .add_server(test_server_config("first", "normal"))
        .await
        .unwrap();
    integration
        .add_server(test_server_config("second", "normal"))
        .await
        .unwrap();

    let result = integration
        .call_tool("echo", serde_json::json!({"message": "x"}))
        .await
        .unwrap();
    assert_eq!(result.metadata["server"], "first");
    assert!(integration.registered_tools()["second"].is_empty());

    integration.manager().stop_server("second").await.unwrap();
    assert_eq!(registry.len(), 4);

    integration.shutdown().await;
}

#[tokio::test]
async fn test_crash_removes_tools_and_list_changed_adds_them() {
    let (integration, registry, _dir) = wired();
    integration
        .add_server(test_server_config("helper", "normal"))
        .await
        .unwrap();

    integration
        .call_tool("grow", serde_json::json!({}))
        .await
        .unwrap();
    wait_until(|| registry.get("late").is_some()).await;

    let crashing = {
        let executor = registry.get("crash").unwrap();
        tokio::spawn(async move { executor.execute(serde_json::json!({})).await })
    };
    wait_until(|| registry.is_empty()).await;
    assert!(integration.registered_tools().is_empty());

    // The in-flight call is left to its timeout.
    assert!(crashing.await.unwrap().is_err());
    integration.shutdown().await;
}

#[tokio::test]
async fn test_install_from_catalog_fills_placeholders() {
    let (integration, registry, _dir) = wired();
    let template = ServerConfig::stdio(
        "helper",
        test_server_exe().to_string_lossy(),
        vec![],
    )
    .with_env("MCP_TEST_SERVER_MODE", "{mode}");
    let catalog = Catalog::new(vec![CatalogEntry {
        name: "helper".to_string(),
        description: "Test helper".to_string(),
        tags: vec!["test".to_string()],
        template,
        requirements: vec![Requirement::Argument {
            name: "mode".to_string(),
            description: "Server mode".to_string(),
        }],
    }]);
    let integration = integration.with_catalog(catalog);

    let err = integration
        .install_from_catalog("helper", &InstallOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("argument mode"));

    let options = InstallOptions {
        name: Some("installed".to_string()),
        args: [("mode".to_string(), "normal".to_string())].into(),
        ..Default::default()
    };
    let status = integration
        .install_from_catalog("helper", &options)
        .await
        .unwrap();

    assert_eq!(status.name, "installed");
    assert_eq!(status.description, "Test helper");
    assert_eq!(registry.len(), 4);

    integration.shutdown().await;
}
