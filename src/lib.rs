//! mcp-host - host-side manager for MCP capability servers
//!
//! This library launches and connects to external capability servers,
//! discovers what they offer, supervises their lifecycle and keeps a tool
//! registry in step with what is currently running.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: Protocol client, transports, server instances and the manager
//! - `integration`: Keeps a [`tools::ToolRegistry`] in sync with server status
//! - `catalog`: Installable server templates
//! - `tools`: Tool executor and registry abstractions
//! - `config`: Application configuration and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_host::{Config, McpIntegration, McpServerManager};
//! use mcp_host::tools::InMemoryToolRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let manager = Arc::new(McpServerManager::new(config.server_store(), config.mcp.clone()));
//!     let integration = McpIntegration::new(manager, Arc::new(InMemoryToolRegistry::new()));
//!     integration.initialize().await?;
//!     println!("{:?}", integration.registry().list());
//!     integration.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod integration;
pub mod mcp;
pub mod tools;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogEntry, InstallOptions};
pub use config::Config;
pub use error::{McpHostError, Result};
pub use integration::McpIntegration;
pub use mcp::config::{McpSettings, ServerConfig, TransportConfig};
pub use mcp::manager::McpServerManager;
pub use mcp::status::{ServerState, ServerStatus};
