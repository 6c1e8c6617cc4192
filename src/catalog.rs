//! Catalog of installable server templates
//!
//! A [`CatalogEntry`] is a [`ServerConfig`] with `{placeholder}` holes plus
//! the requirements that must be met to fill them. Installing an entry
//! checks the requirements, substitutes placeholders and hands back a
//! concrete config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{McpHostError, Result};
use crate::mcp::config::{ServerConfig, TransportConfig};

/// Placeholder syntax inside template strings.
const PLACEHOLDER_PATTERN: &str = r"\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Largest edit distance still offered as a "did you mean".
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Something an entry needs before it can be installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Requirement {
    /// An environment variable, from install options or the process env.
    Env { name: String, description: String },
    /// An executable that must be on `PATH`.
    Command { name: String },
    /// A value supplied at install time.
    Argument { name: String, description: String },
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::Env { name, .. } => write!(f, "environment variable {name}"),
            Requirement::Command { name } => write!(f, "command `{name}` on PATH"),
            Requirement::Argument { name, .. } => write!(f, "argument {name}"),
        }
    }
}

/// Values supplied when installing a catalog entry.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Install under this name instead of the entry's name.
    pub name: Option<String>,
    /// Values for `Env` requirements; also written into the server's env.
    pub env: BTreeMap<String, String>,
    /// Values for `Argument` requirements.
    pub args: BTreeMap<String, String>,
}

/// One installable server template.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(skip)]
    pub template: ServerConfig,
    pub requirements: Vec<Requirement>,
}

impl CatalogEntry {
    /// Requirements not met by `options` and the current environment.
    pub fn missing_requirements(&self, options: &InstallOptions) -> Vec<Requirement> {
        self.requirements
            .iter()
            .filter(|req| match req {
                Requirement::Env { name, .. } => {
                    !options.env.contains_key(name) && std::env::var_os(name).is_none()
                }
                Requirement::Command { name } => find_on_path(name).is_none(),
                Requirement::Argument { name, .. } => !options.args.contains_key(name),
            })
            .cloned()
            .collect()
    }

    /// Build a concrete server config from this template.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Catalog`] listing every unmet requirement, or
    /// naming a placeholder with no value.
    pub fn to_config(&self, options: &InstallOptions) -> Result<ServerConfig> {
        let missing = self.missing_requirements(options);
        if !missing.is_empty() {
            let list: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(McpHostError::Catalog(format!(
                "Cannot install `{}`: missing {}",
                self.name,
                list.join(", ")
            ))
            .into());
        }

        let values = self.placeholder_values(options);
        let fill = |text: &str| substitute(text, &values);

        let mut config = self.template.clone();
        config.name = options.name.clone().unwrap_or_else(|| self.name.clone());
        if config.description.is_empty() {
            config.description = self.description.clone();
        }

        config.transport = match &self.template.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut filled_env = BTreeMap::new();
                for (key, value) in env {
                    filled_env.insert(key.clone(), fill(value)?);
                }
                for (key, value) in &options.env {
                    filled_env.insert(key.clone(), value.clone());
                }
                TransportConfig::Stdio {
                    command: fill(command)?,
                    args: args.iter().map(|a| fill(a)).collect::<Result<_>>()?,
                    env: filled_env,
                    cwd: cwd.clone(),
                }
            }
            TransportConfig::Sse { url, headers } => {
                let mut filled_headers = BTreeMap::new();
                for (key, value) in headers {
                    filled_headers.insert(key.clone(), fill(value)?);
                }
                TransportConfig::Sse {
                    url: fill(url)?,
                    headers: filled_headers,
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Arguments first, then env values from options, then the process env.
    fn placeholder_values(&self, options: &InstallOptions) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for req in &self.requirements {
            if let Requirement::Env { name, .. } = req {
                if let Ok(value) = std::env::var(name) {
                    values.insert(name.clone(), value);
                }
            }
        }
        values.extend(options.env.clone());
        values.extend(options.args.clone());
        values
    }
}

fn placeholder_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let compiled = Regex::new(PLACEHOLDER_PATTERN)
        .map_err(|e| McpHostError::Catalog(format!("Invalid placeholder pattern: {e}")))?;
    Ok(PATTERN.get_or_init(|| compiled))
}

/// Replace every `{name}` in `text` with its value.
fn substitute(text: &str, values: &BTreeMap<String, String>) -> Result<String> {
    let pattern = placeholder_pattern()?;

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = values.get(key.as_str()).ok_or_else(|| {
            McpHostError::Catalog(format!("No value for placeholder `{{{}}}`", key.as_str()))
        })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Locate an executable by name, or accept a path that exists.
pub fn find_on_path(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|full| full.is_file())
}

/// The set of installable templates.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// The templates shipped with the binary.
    pub fn builtin() -> Self {
        Self::new(builtin_entries())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Look up an entry by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Catalog`], with the closest name when one is
    /// near enough to be a typo.
    pub fn get(&self, name: &str) -> Result<&CatalogEntry> {
        if let Some(entry) = self.entries.iter().find(|e| e.name == name) {
            return Ok(entry);
        }
        let message = match self.suggest(name) {
            Some(close) => format!("No catalog entry named `{name}`. Did you mean `{close}`?"),
            None => format!("No catalog entry named `{name}`"),
        };
        Err(McpHostError::Catalog(message).into())
    }

    /// Entries whose name, description or tags contain `query`, ignoring case.
    ///
    /// An entry named exactly `query` comes first, then entries whose name
    /// contains it, then description and tag matches; catalog order breaks ties.
    pub fn search(&self, query: &str) -> Vec<&CatalogEntry> {
        let query = query.to_lowercase();
        let mut matches: Vec<(u8, &CatalogEntry)> = self
            .entries
            .iter()
            .filter_map(|e| {
                let name = e.name.to_lowercase();
                let rank = if name == query {
                    0
                } else if name.contains(&query) {
                    1
                } else if e.description.to_lowercase().contains(&query)
                    || e.tags.iter().any(|t| t.to_lowercase() == query)
                {
                    2
                } else {
                    return None;
                };
                Some((rank, e))
            })
            .collect();
        matches.sort_by_key(|(rank, _)| *rank);
        matches.into_iter().map(|(_, e)| e).collect()
    }

    /// The entry name closest to `name` by edit distance.
    pub fn suggest(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .map(|e| (strsim::levenshtein(name, &e.name), e.name.as_str()))
            .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, name)| name)
    }
}

fn stdio_template(name: &str, command: &str, args: &[&str]) -> ServerConfig {
    ServerConfig::stdio(name, command, args.iter().map(|a| a.to_string()).collect())
}

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

fn builtin_entries() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry {
            name: "filesystem".into(),
            description: "Read and write files under one directory".into(),
            tags: tags(&["files", "local"]),
            template: stdio_template(
                "filesystem",
                "npx",
                &["-y", "@modelcontextprotocol/server-filesystem", "{root}"],
            ),
            requirements: vec![
                Requirement::Command { name: "npx".into() },
                Requirement::Argument {
                    name: "root".into(),
                    description: "Directory the server may access".into(),
                },
            ],
        },
        CatalogEntry {
            name: "github".into(),
            description: "Issues, pull requests and repository contents on GitHub".into(),
            tags: tags(&["git", "remote", "vcs"]),
            template: stdio_template(
                "github",
                "npx",
                &["-y", "@modelcontextprotocol/server-github"],
            )
            .with_env("GITHUB_PERSONAL_ACCESS_TOKEN", "{GITHUB_PERSONAL_ACCESS_TOKEN}"),
            requirements: vec![
                Requirement::Command { name: "npx".into() },
                Requirement::Env {
                    name: "GITHUB_PERSONAL_ACCESS_TOKEN".into(),
                    description: "Token with repo scope".into(),
                },
            ],
        },
        CatalogEntry {
            name: "git".into(),
            description: "Inspect and search a local git repository".into(),
            tags: tags(&["git", "local", "vcs"]),
            template: stdio_template(
                "git",
                "uvx",
                &["mcp-server-git", "--repository", "{repository}"],
            ),
            requirements: vec![
                Requirement::Command { name: "uvx".into() },
                Requirement::Argument {
                    name: "repository".into(),
                    description: "Path to the repository".into(),
                },
            ],
        },
        CatalogEntry {
            name: "fetch".into(),
            description: "Fetch web pages and convert them to markdown".into(),
            tags: tags(&["web", "remote"]),
            template: stdio_template("fetch", "uvx", &["mcp-server-fetch"]),
            requirements: vec![Requirement::Command { name: "uvx".into() }],
        },
        CatalogEntry {
            name: "sqlite".into(),
            description: "Query and modify a SQLite database".into(),
            tags: tags(&["database", "local"]),
            template: stdio_template(
                "sqlite",
                "uvx",
                &["mcp-server-sqlite", "--db-path", "{db_path}"],
            ),
            requirements: vec![
                Requirement::Command { name: "uvx".into() },
                Requirement::Argument {
                    name: "db_path".into(),
                    description: "Database file".into(),
                },
            ],
        },
        CatalogEntry {
            name: "memory".into(),
            description: "Knowledge-graph memory kept across sessions".into(),
            tags: tags(&["memory", "local"]),
            template: stdio_template(
                "memory",
                "npx",
                &["-y", "@modelcontextprotocol/server-memory"],
            ),
            requirements: vec![Requirement::Command { name: "npx".into() }],
        },
        CatalogEntry {
            name: "remote".into(),
            description: "Any server reachable over an event-stream endpoint".into(),
            tags: tags(&["remote", "sse"]),
            template: ServerConfig::sse("remote", "{url}"),
            requirements: vec![Requirement::Argument {
                name: "url".into(),
                description: "Event-stream URL, e.g. http://localhost:3000/sse".into(),
            }],
        },
    ]
}
