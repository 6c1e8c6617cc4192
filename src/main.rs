//! mcp-host - manage MCP capability servers
//!
#![doc = "mcp-host - manage MCP capability servers"]
#![doc = "Main entry point for the mcp-host command line."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_host::cli::{Cli, Commands};
use mcp_host::commands;
use mcp_host::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::List { json } => {
            commands::servers::list_servers(&config, json)?;
            Ok(())
        }
        Commands::Catalog { query, json } => {
            commands::catalog::show_catalog(&config, query.as_deref(), json)?;
            Ok(())
        }
        Commands::Add(args) => {
            tracing::info!(server = %args.name, "Adding server");
            commands::servers::add_server(&config, args).await?;
            Ok(())
        }
        Commands::Remove { name } => {
            tracing::info!(server = %name, "Removing server");
            commands::servers::remove_server(&config, &name).await?;
            Ok(())
        }
        Commands::Install {
            entry,
            name,
            env,
            args,
        } => {
            tracing::info!(entry = %entry, "Installing from catalog");
            commands::catalog::install(&config, &entry, name, env, args).await?;
            Ok(())
        }
        Commands::Tools { json } => {
            commands::tools::list_tools(&config, json).await?;
            Ok(())
        }
        Commands::Call {
            server,
            tool,
            args,
            max_output,
        } => {
            tracing::debug!(server = %server, tool = %tool, "Calling tool");
            commands::tools::call_tool(&config, &server, &tool, &args, max_output).await?;
            Ok(())
        }
        Commands::Status { json } => {
            commands::servers::show_status(&config, json).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so table and JSON output on stdout stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "mcp_host=debug" } else { "mcp_host=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
