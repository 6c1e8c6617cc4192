//! Catalog browsing and installation

use crate::catalog::{find_on_path, CatalogEntry, InstallOptions, Requirement};
use crate::commands::{open_integration, print_json};
use crate::config::Config;
use crate::error::Result;
use colored::Colorize;
use prettytable::{format, row, Table};

/// Handle `catalog [QUERY]`
pub fn show_catalog(config: &Config, query: Option<&str>, json: bool) -> Result<()> {
    let integration = open_integration(config);
    let catalog = integration.catalog();
    let entries: Vec<&CatalogEntry> = match query {
        Some(q) => catalog.search(q),
        None => catalog.entries().iter().collect(),
    };

    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("{}", "No matching catalog entries.".yellow());
        if let Some(close) = query.and_then(|q| catalog.suggest(q)) {
            println!("Did you mean {}?", close.cyan());
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Name".bold(),
        "Description".bold(),
        "Tags".bold(),
        "Requires".bold()
    ]);
    for entry in entries {
        table.add_row(row![
            entry.name.cyan(),
            entry.description,
            entry.tags.join(", "),
            describe_requirements(&entry.requirements)
        ]);
    }
    println!();
    table.printstd();
    println!();
    Ok(())
}

/// Handle `install`
pub async fn install(
    config: &Config,
    entry: &str,
    name: Option<String>,
    env: Vec<(String, String)>,
    args: Vec<(String, String)>,
) -> Result<()> {
    let options = InstallOptions {
        name,
        env: env.into_iter().collect(),
        args: args.into_iter().collect(),
    };
    let integration = open_integration(config);
    let status = integration.install_from_catalog(entry, &options).await?;
    println!(
        "{}",
        format!("Installed {} as server {}", entry, status.name).green()
    );
    Ok(())
}

fn describe_requirements(requirements: &[Requirement]) -> String {
    if requirements.is_empty() {
        return "-".to_string();
    }
    requirements
        .iter()
        .map(|r| match r {
            Requirement::Command { name } if find_on_path(name).is_none() => {
                format!("{} (not found)", r)
            }
            _ => r.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
