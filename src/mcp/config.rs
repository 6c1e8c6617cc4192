//! Server configuration model and the persisted configuration document
//!
//! The document is a single JSON object keyed by server name:
//!
//! ```json
//! {
//!   "echo":   { "command": "echo-server", "args": [], "enabled": true, "autoStart": true },
//!   "remote": { "transport": "sse", "url": "http://localhost:3000/sse", "headers": {} }
//! }
//! ```
//!
//! Entries that cannot be turned into a [`ServerConfig`] are skipped with a
//! warning when the document is loaded; a malformed document is an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{McpHostError, Result};

/// Server names are used as map keys, log fields and CLI arguments.
pub const SERVER_NAME_PATTERN: &str = r"^[A-Za-z0-9_.-]+$";

fn server_name_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let compiled = Regex::new(SERVER_NAME_PATTERN)
        .map_err(|e| McpHostError::Config(format!("Invalid name pattern: {e}")))?;
    Ok(PATTERN.get_or_init(|| compiled))
}

/// Transport-specific settings for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Spawn a child process and speak newline-delimited JSON over its pipes.
    Stdio {
        /// Executable to launch.
        command: String,
        /// Arguments passed to the executable.
        args: Vec<String>,
        /// Variables merged over the host's own environment.
        env: BTreeMap<String, String>,
        /// Working directory for the child.
        cwd: Option<PathBuf>,
    },
    /// Open a server-push connection and POST requests to the session endpoint.
    Sse {
        /// URL of the push connection.
        url: String,
        /// Headers sent with the push connection and every POST.
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    /// Discriminator written to the `transport` field of the document.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Sse { .. } => "sse",
        }
    }
}

/// Configuration for one capability server.
///
/// `name` is the key in the configuration document and never changes once
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique server name.
    pub name: String,
    /// How to reach the server.
    pub transport: TransportConfig,
    /// Disabled servers are never auto-started.
    pub enabled: bool,
    /// Start with `start_all_enabled` when also enabled.
    pub auto_start: bool,
    /// Free-text description shown in status listings.
    pub description: String,
}

impl ServerConfig {
    /// A stdio server config with no environment overrides.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_host::mcp::config::ServerConfig;
    ///
    /// let config = ServerConfig::stdio("echo", "echo-server", vec![]);
    /// assert!(config.enabled);
    /// assert_eq!(config.transport.kind(), "stdio");
    /// ```
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
                cwd: None,
            },
            enabled: true,
            auto_start: true,
            description: String::new(),
        }
    }

    /// An event-stream server config with no extra headers.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Sse {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            enabled: true,
            auto_start: true,
            description: String::new(),
        }
    }

    /// Add an environment variable (stdio) or header (event-stream).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Stdio { env, .. } => {
                env.insert(key.into(), value.into());
            }
            TransportConfig::Sse { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
        }
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check the name and the transport's required fields.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !server_name_pattern()?.is_match(&self.name) {
            return Err(McpHostError::Config(format!(
                "Invalid server name `{}`: use letters, digits, `_`, `-` or `.`",
                self.name
            ))
            .into());
        }

        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(McpHostError::Config(format!(
                        "Server `{}` has an empty command",
                        self.name
                    ))
                    .into());
                }
            }
            TransportConfig::Sse { url, .. } => {
                let parsed = url::Url::parse(url).map_err(|e| {
                    McpHostError::Config(format!("Server `{}` has invalid url: {e}", self.name))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(McpHostError::Config(format!(
                        "Server `{}` url must use http or https",
                        self.name
                    ))
                    .into());
                }
            }
        }

        Ok(())
    }

    fn from_entry(name: &str, entry: ServerEntry) -> Result<Self> {
        let is_sse = match entry.transport.as_deref() {
            Some("sse") => true,
            Some("stdio") => false,
            Some(other) => {
                return Err(McpHostError::Config(format!("unknown transport `{other}`")).into())
            }
            None => entry.command.is_none() && entry.url.is_some(),
        };

        let transport = if is_sse {
            TransportConfig::Sse {
                url: entry
                    .url
                    .ok_or_else(|| McpHostError::Config("missing `url`".to_string()))?,
                headers: entry.headers,
            }
        } else {
            TransportConfig::Stdio {
                command: entry
                    .command
                    .ok_or_else(|| McpHostError::Config("missing `command`".to_string()))?,
                args: entry.args,
                env: entry.env,
                cwd: entry.cwd,
            }
        };

        let config = Self {
            name: name.to_string(),
            transport,
            enabled: entry.enabled,
            auto_start: entry.auto_start,
            description: entry.description,
        };
        config.validate()?;
        Ok(config)
    }

    fn to_entry(&self) -> ServerEntry {
        let mut entry = ServerEntry {
            transport: Some(self.transport.kind().to_string()),
            description: self.description.clone(),
            enabled: self.enabled,
            auto_start: self.auto_start,
            ..ServerEntry::default()
        };
        match &self.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                entry.command = Some(command.clone());
                entry.args = args.clone();
                entry.env = env.clone();
                entry.cwd = cwd.clone();
            }
            TransportConfig::Sse { url, headers } => {
                entry.url = Some(url.clone());
                entry.headers = headers.clone();
            }
        }
        entry
    }
}

/// One value of the configuration document, as it appears on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_true")]
    auto_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// Reads and writes the configuration document.
///
/// Only the server manager writes through a store. The file may still be
/// edited by other processes, so every mutation is load-modify-save.
#[derive(Debug, Clone)]
pub struct ServerConfigStore {
    path: PathBuf,
}

impl ServerConfigStore {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every valid server config, keyed by name.
    ///
    /// A missing file yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Config`] if the file cannot be read or is not
    /// a JSON object.
    pub fn load(&self) -> Result<BTreeMap<String, ServerConfig>> {
        let mut configs = BTreeMap::new();
        for (name, value) in self.read_raw()? {
            match parse_entry(&name, value) {
                Ok(config) => {
                    configs.insert(name, config);
                }
                Err(e) => tracing::warn!(server = %name, "skipping server config entry: {e:#}"),
            }
        }

        Ok(configs)
    }

    /// Replace the document with `configs`.
    ///
    /// Entries that [`load`](Self::load) skipped are written back unchanged,
    /// unless `configs` now holds a server of the same name. Writes to a
    /// sibling temporary file and renames it into place.
    pub fn save(&self, configs: &BTreeMap<String, ServerConfig>) -> Result<()> {
        let mut document: BTreeMap<String, serde_json::Value> = self
            .read_raw()?
            .into_iter()
            .filter(|(name, value)| {
                !configs.contains_key(name) && parse_entry(name, value.clone()).is_err()
            })
            .collect();
        let kept = document.len();

        for (name, config) in configs {
            document.insert(name.clone(), serde_json::to_value(config.to_entry())?);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            count = configs.len(),
            kept_unparsed = kept,
            "saved server configs"
        );
        Ok(())
    }

    /// The document as raw JSON values keyed by name; empty when absent.
    fn read_raw(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "server config document not found");
            return Ok(BTreeMap::new());
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            McpHostError::Config(format!(
                "Failed to read server config {}: {e}",
                self.path.display()
            ))
        })?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let raw = serde_json::from_str(&contents).map_err(|e| {
            McpHostError::Config(format!(
                "Failed to parse server config {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(raw)
    }
}

fn parse_entry(name: &str, value: serde_json::Value) -> Result<ServerConfig> {
    let entry = serde_json::from_value::<ServerEntry>(value)?;
    ServerConfig::from_entry(name, entry)
}

/// Timeouts and client identity used by every server session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpSettings {
    /// Window for a correlated reply to any request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Window for the `endpoint` event of an event-stream connection.
    #[serde(default = "default_endpoint_timeout")]
    pub endpoint_timeout_seconds: u64,

    /// Pause after `notifications/initialized` before listing catalogs.
    #[serde(default = "default_handshake_grace")]
    pub handshake_grace_ms: u64,

    /// How long a stdio child gets to exit after its stdin is closed.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    /// Name sent as `clientInfo.name`.
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Version sent as `clientInfo.version`.
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_endpoint_timeout() -> u64 {
    30
}

fn default_handshake_grace() -> u64 {
    100
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            endpoint_timeout_seconds: default_endpoint_timeout(),
            handshake_grace_ms: default_handshake_grace(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

impl McpSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoint_timeout_seconds)
    }

    pub fn handshake_grace(&self) -> Duration {
        Duration::from_millis(self.handshake_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Upper bound on listing every catalog after the handshake: one request
    /// window per catalog kind.
    pub fn discovery_timeout(&self) -> Duration {
        self.request_timeout() * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_doc(dir: &TempDir, json: &str) -> ServerConfigStore {
        let path = dir.path().join("servers.json");
        std::fs::write(&path, json).unwrap();
        ServerConfigStore::new(path)
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ServerConfigStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_infers_transport_kind() {
        let dir = TempDir::new().unwrap();
        let store = write_doc(
            &dir,
            r#"{
                "echo": { "command": "echo-server", "args": ["--quiet"], "env": {"A": "1"} },
                "remote": { "url": "http://localhost:3000/sse", "headers": {"X-Key": "k"} }
            }"#,
        );

        let configs = store.load().unwrap();
        assert_eq!(configs.len(), 2);

        match &configs["echo"].transport {
            TransportConfig::Stdio { command, args, env, .. } => {
                assert_eq!(command, "echo-server");
                assert_eq!(args, &vec!["--quiet".to_string()]);
                assert_eq!(env.get("A").map(String::as_str), Some("1"));
            }
            other => panic!("expected stdio, got {other:?}"),
        }
        assert_eq!(configs["remote"].transport.kind(), "sse");
        assert!(configs["echo"].enabled);
        assert!(configs["echo"].auto_start);
    }

    #[test]
    fn test_load_skips_entries_missing_required_fields() {
        let dir = TempDir::new().unwrap();
        let store = write_doc(
            &dir,
            r#"{
                "good": { "command": "srv" },
                "no-command": { "args": ["x"] },
                "no-url": { "transport": "sse" },
                "bad name": { "command": "srv" }
            }"#,
        );

        let configs = store.load().unwrap();
        assert_eq!(configs.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn test_save_keeps_entries_that_were_skipped() {
        let dir = TempDir::new().unwrap();
        let store = write_doc(
            &dir,
            r#"{
                "good": { "command": "srv" },
                "draft": { "args": ["--port", "9000"], "description": "half-written" }
            }"#,
        );

        let mut configs = store.load().unwrap();
        configs.insert("added".to_string(), ServerConfig::stdio("added", "other", vec![]));
        store.save(&configs).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(doc["draft"]["args"], serde_json::json!(["--port", "9000"]));
        assert_eq!(doc["draft"]["description"], "half-written");
        assert_eq!(doc["added"]["command"], "other");

        // A valid entry left out of the map is removed; an unparsed one is replaced by name.
        configs.remove("good");
        configs.insert("draft".to_string(), ServerConfig::stdio("draft", "fixed", vec![]));
        store.save(&configs).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["added", "draft"]);
        assert_eq!(loaded["draft"], ServerConfig::stdio("draft", "fixed", vec![]));
    }

    #[test]
    fn test_server_name_pattern_is_compiled_once() {
        let first = server_name_pattern().unwrap();
        let second = server_name_pattern().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_load_malformed_document_is_error() {
        let dir = TempDir::new().unwrap();
        let store = write_doc(&dir, "[1, 2, 3]");
        let err = store.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHostError>(),
            Some(McpHostError::Config(_))
        ));
    }

    #[test]
    fn test_save_load_save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ServerConfigStore::new(dir.path().join("nested").join("servers.json"));

        let mut configs = BTreeMap::new();
        configs.insert(
            "echo".to_string(),
            ServerConfig::stdio("echo", "echo-server", vec!["a".into()])
                .with_env("TOKEN", "t")
                .with_description("Echo"),
        );
        let mut remote = ServerConfig::sse("remote", "https://example.com/sse");
        remote.auto_start = false;
        configs.insert("remote".to_string(), remote);

        store.save(&configs).unwrap();
        let first = std::fs::read_to_string(store.path()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, configs);

        store.save(&loaded).unwrap();
        let second = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_saved_document_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let store = ServerConfigStore::new(dir.path().join("servers.json"));
        let mut configs = BTreeMap::new();
        configs.insert("remote".to_string(), ServerConfig::sse("remote", "http://h/sse"));
        store.save(&configs).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(doc["remote"]["transport"], "sse");
        assert_eq!(doc["remote"]["autoStart"], true);
        assert!(doc["remote"].get("command").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_url_scheme() {
        let config = ServerConfig::sse("remote", "ftp://example.com/sse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_command() {
        let config = ServerConfig::stdio("echo", "  ", vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = McpSettings::default();
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.handshake_grace(), Duration::from_millis(100));
        assert_eq!(settings.client_name, "mcp-host");
    }
}
