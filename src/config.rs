//! Configuration management for mcp-host
//!
//! This module handles loading, parsing, validating, and managing
//! application settings from a YAML file, environment variables, and CLI
//! overrides. The per-server configuration document is separate; see
//! [`crate::mcp::config::ServerConfigStore`].

use crate::error::{McpHostError, Result};
use crate::mcp::config::{McpSettings, ServerConfigStore};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for mcp-host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Location of the server configuration document
    #[serde(default = "default_servers_file")]
    pub servers_file: PathBuf,

    /// Protocol and lifecycle settings
    #[serde(default)]
    pub mcp: McpSettings,
}

fn default_servers_file() -> PathBuf {
    ProjectDirs::from("dev", "mcp-host", "mcp-host")
        .map(|dirs| dirs.config_dir().join("servers.json"))
        .unwrap_or_else(|| PathBuf::from("servers.json"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers_file: default_servers_file(),
            mcp: McpSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| McpHostError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| McpHostError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(servers_file) = std::env::var("MCP_HOST_SERVERS_FILE") {
            self.servers_file = PathBuf::from(servers_file);
        }

        if let Ok(timeout) = std::env::var("MCP_HOST_REQUEST_TIMEOUT") {
            if let Ok(value) = timeout.parse() {
                self.mcp.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid MCP_HOST_REQUEST_TIMEOUT: {}", timeout);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(servers_file) = &cli.servers_file {
            self.servers_file = servers_file.clone();
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any timeout is zero or the client name is empty
    pub fn validate(&self) -> Result<()> {
        if self.mcp.request_timeout_seconds == 0 {
            return Err(McpHostError::Config(
                "mcp.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.mcp.endpoint_timeout_seconds == 0 {
            return Err(McpHostError::Config(
                "mcp.endpoint_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.mcp.client_name.trim().is_empty() {
            return Err(
                McpHostError::Config("mcp.client_name cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }

    /// The store for the server configuration document.
    pub fn server_store(&self) -> ServerConfigStore {
        ServerConfigStore::new(self.servers_file.clone())
    }
}
