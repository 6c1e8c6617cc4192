//! Command-line interface definition for mcp-host
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to manage server configs, browse the catalog and
//! exercise running servers.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// mcp-host - manage MCP capability servers
///
/// Configure stdio and event-stream servers, start them, and call the
/// tools they advertise.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-host")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Path to the server configuration document
    #[arg(long)]
    pub servers_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcp-host
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List configured servers
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Browse installable server templates
    Catalog {
        /// Only show entries matching this text or tag
        query: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Add a server config
    Add(AddArgs),

    /// Remove a server config
    Remove {
        /// Server name
        name: String,
    },

    /// Install a server from the catalog
    Install {
        /// Catalog entry name
        entry: String,

        /// Install under a different name
        #[arg(long)]
        name: Option<String>,

        /// Environment value, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,

        /// Template argument, KEY=VALUE (repeatable)
        #[arg(long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },

    /// Start enabled servers and list the tools they register
    Tools {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start one server and call one of its tools
    Call {
        /// Server name
        server: String,

        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Truncate output to this many bytes
        #[arg(long)]
        max_output: Option<usize>,
    },

    /// Start enabled servers and report their status
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Arguments for `add`
#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Server name
    pub name: String,

    /// Executable to spawn (stdio transport)
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    pub command: Option<String>,

    /// Event-stream URL (sse transport)
    #[arg(long)]
    pub url: Option<String>,

    /// Environment variable for a stdio server, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// HTTP header for an event-stream server, KEY=VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_key_val)]
    pub headers: Vec<(String, String)>,

    /// Working directory for a stdio server
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Free-text description
    #[arg(long, default_value = "")]
    pub description: String,

    /// Store the server disabled
    #[arg(long)]
    pub disabled: bool,

    /// Do not start with the other enabled servers
    #[arg(long)]
    pub no_auto_start: bool,

    /// Arguments passed to the command
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Parse a `KEY=VALUE` pair
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
