/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `servers` -- list, add and remove server configs; report status
- `catalog` -- browse templates and install from them
- `tools`   -- list registered tools and call one

Handlers are thin: they build a manager or an integration from the loaded
[`Config`] and print what the library returns.
*/

pub mod catalog;
pub mod servers;
pub mod tools;

use crate::config::Config;
use crate::error::{McpHostError, Result};
use crate::integration::McpIntegration;
use crate::mcp::manager::McpServerManager;
use crate::tools::InMemoryToolRegistry;
use std::sync::Arc;

/// Build a manager over the configured server document.
pub fn open_manager(config: &Config) -> Arc<McpServerManager> {
    Arc::new(McpServerManager::new(
        config.server_store(),
        config.mcp.clone(),
    ))
}

/// Build an integration with an in-memory registry.
///
/// Adding a server from the command line only persists it; the process
/// exits right after, so nothing is started.
pub fn open_integration(config: &Config) -> McpIntegration {
    McpIntegration::new(open_manager(config), Arc::new(InMemoryToolRegistry::new()))
        .with_start_on_add(false)
}

/// Print a value as pretty JSON on stdout.
fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(McpHostError::Serialization)?;
    println!("{}", json);
    Ok(())
}
