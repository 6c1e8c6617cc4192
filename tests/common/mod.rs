use std::path::PathBuf;
use std::sync::Arc;

use mcp_host::mcp::config::{McpSettings, ServerConfig, ServerConfigStore};
use mcp_host::mcp::manager::McpServerManager;
use tempfile::TempDir;

/// Path to the `mcp_test_server` helper binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` for integration tests in this
/// package.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcp_test_server"))
}

/// A stdio config that launches the helper in `mode`.
#[allow(dead_code)]
pub fn test_server_config(name: &str, mode: &str) -> ServerConfig {
    ServerConfig::stdio(name, test_server_exe().to_string_lossy(), vec![])
        .with_env("MCP_TEST_SERVER_MODE", mode)
}

/// Settings with short timeouts so failure paths finish quickly.
#[allow(dead_code)]
pub fn fast_settings() -> McpSettings {
    McpSettings {
        request_timeout_seconds: 2,
        endpoint_timeout_seconds: 2,
        shutdown_timeout_seconds: 1,
        ..McpSettings::default()
    }
}

/// A manager over a fresh config document in a temp dir.
#[allow(dead_code)]
pub fn temp_manager(settings: McpSettings) -> (Arc<McpServerManager>, TempDir) {
    let dir = TempDir::new().expect("failed to create tempdir");
    let store = ServerConfigStore::new(dir.path().join("servers.json"));
    (Arc::new(McpServerManager::new(store, settings)), dir)
}
