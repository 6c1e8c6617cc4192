//! Server config and status commands

use crate::cli::AddArgs;
use crate::commands::{open_integration, open_manager, print_json};
use crate::config::Config;
use crate::error::{McpHostError, Result};
use crate::mcp::config::{ServerConfig, TransportConfig};
use crate::mcp::status::{ServerState, ServerStatus};
use colored::Colorize;
use prettytable::{format, row, Table};
use serde::Serialize;

/// One row of `list` output.
#[derive(Debug, Serialize)]
struct ServerRow {
    name: String,
    transport: &'static str,
    target: String,
    enabled: bool,
    auto_start: bool,
    description: String,
}

impl From<&ServerConfig> for ServerRow {
    fn from(config: &ServerConfig) -> Self {
        let target = match &config.transport {
            TransportConfig::Stdio { command, args, .. } => {
                std::iter::once(command.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            TransportConfig::Sse { url, .. } => url.clone(),
        };
        Self {
            name: config.name.clone(),
            transport: config.transport.kind(),
            target,
            enabled: config.enabled,
            auto_start: config.auto_start,
            description: config.description.clone(),
        }
    }
}

/// Handle `list`
pub fn list_servers(config: &Config, json: bool) -> Result<()> {
    let manager = open_manager(config);
    let rows: Vec<ServerRow> = manager.load_configs()?.values().map(ServerRow::from).collect();

    if json {
        return print_json(&rows);
    }

    if rows.is_empty() {
        println!("{}", "No servers configured.".yellow());
        println!(
            "Use {} or {} to add one.",
            "mcp-host add".cyan(),
            "mcp-host install".cyan()
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Name".bold(),
        "Transport".bold(),
        "Target".bold(),
        "Enabled".bold(),
        "Auto-start".bold(),
        "Description".bold()
    ]);
    for row in &rows {
        table.add_row(row![
            row.name.cyan(),
            row.transport,
            row.target,
            yes_no(row.enabled),
            yes_no(row.auto_start),
            row.description
        ]);
    }

    println!("\nConfigured servers ({}):", config.servers_file.display());
    table.printstd();
    println!();
    Ok(())
}

/// Handle `add`
pub async fn add_server(config: &Config, args: AddArgs) -> Result<()> {
    let (mut server, pairs) = match (&args.command, &args.url) {
        (Some(command), _) => (
            ServerConfig::stdio(&args.name, command, args.args.clone()),
            &args.env,
        ),
        (None, Some(url)) => (ServerConfig::sse(&args.name, url), &args.headers),
        (None, None) => {
            return Err(
                McpHostError::Config("either --command or --url is required".to_string()).into(),
            )
        }
    };
    for (key, value) in pairs {
        server = server.with_env(key, value);
    }
    if let TransportConfig::Stdio { cwd, .. } = &mut server.transport {
        *cwd = args.cwd.clone();
    }
    server.enabled = !args.disabled;
    server.auto_start = !args.no_auto_start;
    server = server.with_description(args.description);

    open_integration(config).add_server(server).await?;
    println!("{}", format!("Added server {}", args.name).green());
    Ok(())
}

/// Handle `remove`
pub async fn remove_server(config: &Config, name: &str) -> Result<()> {
    open_integration(config).remove_server(name).await?;
    println!("{}", format!("Removed server {}", name).green());
    Ok(())
}

/// Handle `status`: start enabled servers, report, stop them again
pub async fn show_status(config: &Config, json: bool) -> Result<()> {
    let manager = open_manager(config);
    let report = manager.start_all_enabled().await?;
    let mut statuses = manager.get_all_server_statuses()?;
    manager.stop_all().await;

    // A failed start leaves no instance behind; surface the failure here.
    for status in &mut statuses {
        if let Some((_, error)) = report.failed.iter().find(|(name, _)| *name == status.name) {
            status.state = ServerState::Error;
            status.error = Some(error.clone());
        }
    }

    if json {
        return print_json(&statuses);
    }

    if statuses.is_empty() {
        println!("{}", "No servers configured.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Name".bold(),
        "Status".bold(),
        "PID".bold(),
        "Tools".bold(),
        "Resources".bold(),
        "Prompts".bold(),
        "Server".bold()
    ]);
    for status in &statuses {
        table.add_row(row![
            status.name.cyan(),
            colored_state(status),
            status.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            status.tools.len(),
            status.resources.len(),
            status.prompts.len(),
            status
                .server_info
                .as_ref()
                .map(|i| format!("{} {}", i.name, i.version))
                .unwrap_or_else(|| "-".to_string())
        ]);
    }
    println!();
    table.printstd();

    for status in statuses.iter().filter(|s| s.error.is_some()) {
        println!(
            "{} {}: {}",
            "error".red().bold(),
            status.name,
            status.error.as_deref().unwrap_or_default()
        );
    }
    println!();
    Ok(())
}

fn colored_state(status: &ServerStatus) -> colored::ColoredString {
    let label = status.state.to_string();
    match status.state {
        ServerState::Running => label.green(),
        ServerState::Starting => label.yellow(),
        ServerState::Error => label.red(),
        ServerState::Stopped => label.normal(),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
