//! Server status snapshots and the status bus
//!
//! Every state change of a server instance produces a complete
//! [`ServerStatus`] snapshot; nothing is patched in place. Snapshots are
//! delivered two ways:
//!
//! - synchronously to registered [`StatusListener`]s, while the instance
//!   still holds its status lock, so a listener's side effects are ordered
//!   with the transition itself;
//! - asynchronously on a [`tokio::sync::broadcast`] channel for observers
//!   that only need to watch.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::mcp::config::ServerConfig;
use crate::mcp::types::{Implementation, McpTool, Prompt, Resource, ServerCapabilities};

/// Capacity of the broadcast channel; slow subscribers see `Lagged`.
const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Error,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Complete status of one server at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Server name.
    pub name: String,
    /// Lifecycle state.
    #[serde(rename = "status")]
    pub state: ServerState,
    /// Child process id, for stdio servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Why the server is in the `error` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Description copied from the server config.
    pub description: String,
    /// Discovered tools; empty unless running.
    pub tools: Vec<McpTool>,
    /// Discovered resources; empty unless running.
    pub resources: Vec<Resource>,
    /// Discovered prompts; empty unless running.
    pub prompts: Vec<Prompt>,
    /// The peer's self-description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// The peer's declared capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ServerCapabilities>,
    /// When this state was entered.
    pub since: DateTime<Utc>,
}

impl ServerStatus {
    /// A snapshot in `state` with empty catalogs.
    pub fn new(config: &ServerConfig, state: ServerState) -> Self {
        Self {
            name: config.name.clone(),
            state,
            pid: None,
            error: None,
            description: config.description.clone(),
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            server_info: None,
            capabilities: None,
            since: Utc::now(),
        }
    }

    /// The placeholder reported for a configured server with no instance.
    pub fn stopped(config: &ServerConfig) -> Self {
        Self::new(config, ServerState::Stopped)
    }

    /// An `error` snapshot carrying `message`.
    pub fn failed(config: &ServerConfig, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(config, ServerState::Error)
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }
}

/// Receives every status snapshot synchronously.
///
/// Implementations must not block and must not call back into the server
/// instance that is publishing; the snapshot carries everything needed.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, status: &ServerStatus);
}

/// Fan-out point for status snapshots from every instance of one manager.
#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<ServerStatus>,
    listeners: Arc<RwLock<Vec<Arc<dyn StatusListener>>>>,
}

impl std::fmt::Debug for StatusBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish_non_exhaustive()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            tx,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Watch snapshots asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerStatus> {
        self.tx.subscribe()
    }

    /// Register a synchronous listener.
    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Deliver a snapshot to listeners, then to subscribers.
    pub fn publish(&self, status: &ServerStatus) {
        tracing::debug!(server = %status.name, state = %status.state, "status changed");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener.on_status(status);
        }
        // No subscribers is fine.
        let _ = self.tx.send(status.clone());
    }
}
