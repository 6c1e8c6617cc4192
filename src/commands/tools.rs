//! Tool listing and invocation against live servers

use crate::commands::{open_integration, open_manager, print_json};
use crate::config::Config;
use crate::error::{McpHostError, Result};
use crate::tools::mcp_tool::into_tool_result;
use colored::Colorize;
use prettytable::{format, row, Table};
use serde::Serialize;

/// One registered tool, as printed by `tools`.
#[derive(Debug, Serialize)]
struct ToolRow {
    server: String,
    name: String,
    description: String,
}

/// Handle `tools`: start enabled servers and list what they registered
pub async fn list_tools(config: &Config, json: bool) -> Result<()> {
    let integration = open_integration(config);
    let report = integration.initialize().await?;
    for (server, error) in &report.failed {
        eprintln!("{} {}: {}", "warning".yellow().bold(), server, error);
    }

    let mut rows = Vec::new();
    for (server, tools) in integration.registered_tools() {
        for name in tools {
            let description = integration
                .registry()
                .get(&name)
                .and_then(|executor| {
                    executor
                        .tool_definition()
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_default();
            rows.push(ToolRow {
                server: server.clone(),
                name,
                description,
            });
        }
    }
    integration.shutdown().await;
    rows.sort_by(|a, b| (&a.server, &a.name).cmp(&(&b.server, &b.name)));

    if json {
        return print_json(&rows);
    }

    if rows.is_empty() {
        println!("{}", "No tools registered.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Server".bold(), "Tool".bold(), "Description".bold()]);
    for row in &rows {
        table.add_row(row![row.server.cyan(), row.name, row.description]);
    }
    println!();
    table.printstd();
    println!();
    Ok(())
}

/// Handle `call`: start one server, call one tool, stop the server
///
/// # Errors
///
/// Returns an error if `args` is not a JSON object, the server cannot be
/// started, the call fails, or the tool reports failure.
pub async fn call_tool(
    config: &Config,
    server: &str,
    tool: &str,
    args: &str,
    max_output: Option<usize>,
) -> Result<()> {
    let arguments: serde_json::Value = serde_json::from_str(args)
        .map_err(|e| McpHostError::Config(format!("Invalid --args JSON: {}", e)))?;
    if !arguments.is_object() {
        return Err(McpHostError::Config("--args must be a JSON object".to_string()).into());
    }

    let manager = open_manager(config);
    manager.start_server_by_name(server).await?;
    let outcome = manager.call_tool(server, tool, Some(arguments)).await;
    manager.stop_all().await;

    let mut result = into_tool_result(outcome?);
    if let Some(max) = max_output {
        result = result.truncate_if_needed(max);
    }

    if result.success {
        println!("{}", result.to_message());
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Tool `{}` on server `{}` failed: {}",
            tool,
            server,
            result.error.as_deref().unwrap_or("unknown error")
        ))
    }
}
