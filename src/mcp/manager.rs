//! Server manager: configuration persistence and the live-instance map
//!
//! [`McpServerManager`] is the only writer of the server configuration
//! document and the only owner of [`McpServer`] instances. Every instance it
//! creates publishes on the manager's [`StatusBus`], which makes the manager
//! the single status source for the rest of the application.
//!
//! The instance map is guarded by a synchronous mutex that is never held
//! across an `.await`; operations on different servers proceed in parallel.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{McpHostError, Result};
use crate::mcp::config::{McpSettings, ServerConfig, ServerConfigStore};
use crate::mcp::server::McpServer;
use crate::mcp::status::{ServerState, ServerStatus, StatusBus, StatusListener};
use crate::mcp::types::{CallToolResponse, ResourceContents};

/// Outcome of [`McpServerManager::start_all_enabled`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartAllReport {
    /// Servers that reached `running`.
    pub started: Vec<String>,
    /// Servers that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// Owns server configs and live server instances.
#[derive(Debug)]
pub struct McpServerManager {
    store: ServerConfigStore,
    settings: McpSettings,
    bus: StatusBus,
    instances: Mutex<HashMap<String, Arc<McpServer>>>,
    /// Serializes load-modify-save cycles on the config document.
    config_lock: tokio::sync::Mutex<()>,
}

impl McpServerManager {
    /// Create a manager over a config document.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_host::mcp::config::{McpSettings, ServerConfigStore};
    /// use mcp_host::mcp::manager::McpServerManager;
    ///
    /// let manager = McpServerManager::new(
    ///     ServerConfigStore::new("/tmp/mcp-host-doc/servers.json"),
    ///     McpSettings::default(),
    /// );
    /// assert!(manager.running_servers().is_empty());
    /// ```
    pub fn new(store: ServerConfigStore, settings: McpSettings) -> Self {
        Self {
            store,
            settings,
            bus: StatusBus::new(),
            instances: Mutex::new(HashMap::new()),
            config_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &McpSettings {
        &self.settings
    }

    pub fn store(&self) -> &ServerConfigStore {
        &self.store
    }

    /// Watch status snapshots from every instance.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerStatus> {
        self.bus.subscribe()
    }

    /// Register a listener that sees every snapshot synchronously.
    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) {
        self.bus.add_listener(listener);
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Every persisted server config.
    pub fn load_configs(&self) -> Result<BTreeMap<String, ServerConfig>> {
        self.store.load()
    }

    /// Replace every server config in the document.
    pub async fn save_configs(&self, configs: &BTreeMap<String, ServerConfig>) -> Result<()> {
        let _guard = self.config_lock.lock().await;
        self.store.save(configs)
    }

    /// One persisted config.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::NotFound`] for an unknown name.
    pub fn get_config(&self, name: &str) -> Result<ServerConfig> {
        self.store
            .load()?
            .remove(name)
            .ok_or_else(|| McpHostError::NotFound(name.to_string()).into())
    }

    /// Persist a new server config.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Config`] if the config is invalid or the name
    /// is already taken.
    pub async fn add_config(&self, config: ServerConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.config_lock.lock().await;
        let mut configs = self.store.load()?;
        if configs.contains_key(&config.name) {
            return Err(McpHostError::Config(format!(
                "Server `{}` already exists",
                config.name
            ))
            .into());
        }
        tracing::info!(server = %config.name, "adding server config");
        configs.insert(config.name.clone(), config);
        self.store.save(&configs)
    }

    /// Overwrite an existing config and return the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::NotFound`] if no config has this name.
    pub async fn update_config(&self, config: ServerConfig) -> Result<ServerConfig> {
        config.validate()?;
        let _guard = self.config_lock.lock().await;
        let mut configs = self.store.load()?;
        let previous = configs
            .insert(config.name.clone(), config.clone())
            .ok_or_else(|| McpHostError::NotFound(config.name.clone()))?;
        self.store.save(&configs)?;
        tracing::info!(server = %config.name, "updated server config");
        Ok(previous)
    }

    /// Delete a persisted config. Does not touch a live instance.
    pub async fn remove_config(&self, name: &str) -> Result<ServerConfig> {
        let _guard = self.config_lock.lock().await;
        let mut configs = self.store.load()?;
        let removed = configs
            .remove(name)
            .ok_or_else(|| McpHostError::NotFound(name.to_string()))?;
        self.store.save(&configs)?;
        tracing::info!(server = %name, "removed server config");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start a server from `config`.
    ///
    /// A `stopped`, `error` or `starting` instance under the same name is
    /// stale and is torn down first. A failed start leaves no entry behind.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::AlreadyRunning`] if a `running` instance
    /// exists, otherwise whatever [`McpServer::start`] fails with.
    pub async fn start_server(&self, config: &ServerConfig) -> Result<ServerStatus> {
        config.validate()?;
        let name = config.name.as_str();

        if let Some(existing) = self.instance(name) {
            if existing.is_running() {
                return Err(McpHostError::AlreadyRunning(name.to_string()).into());
            }
            tracing::debug!(server = %name, state = %existing.status().state, "discarding stale instance");
            self.remove_instance(name, &existing);
            existing.stop().await;
        }

        let server = McpServer::new(config.clone(), self.settings.clone(), self.bus.clone());
        {
            let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
            if instances.contains_key(name) {
                return Err(McpHostError::AlreadyRunning(name.to_string()).into());
            }
            instances.insert(name.to_string(), Arc::clone(&server));
        }

        match server.start().await {
            Ok(()) => Ok(server.status()),
            Err(e) => {
                self.remove_instance(name, &server);
                Err(e)
            }
        }
    }

    /// Start a persisted server by name.
    pub async fn start_server_by_name(&self, name: &str) -> Result<ServerStatus> {
        let config = self.get_config(name)?;
        self.start_server(&config).await
    }

    /// Stop a server and forget its instance. Unknown names are a no-op.
    pub async fn stop_server(&self, name: &str) -> Result<()> {
        let Some(server) = self.instance(name) else {
            tracing::debug!(server = %name, "stop requested for server with no instance");
            return Ok(());
        };
        server.stop().await;
        self.remove_instance(name, &server);
        Ok(())
    }

    /// Start every config that is both enabled and auto-start, concurrently.
    ///
    /// Individual failures are logged and reported, never raised.
    pub async fn start_all_enabled(&self) -> Result<StartAllReport> {
        let configs = self.store.load()?;
        let wanted: Vec<&ServerConfig> = configs
            .values()
            .filter(|c| c.enabled && c.auto_start)
            .collect();

        let results = join_all(wanted.iter().map(|config| async move {
            (config.name.clone(), self.start_server(config).await)
        }))
        .await;

        let mut report = StartAllReport::default();
        for (name, result) in results {
            match result {
                Ok(_) => report.started.push(name),
                Err(e) => {
                    tracing::warn!(server = %name, "failed to start server: {e:#}");
                    report.failed.push((name, format!("{e:#}")));
                }
            }
        }
        tracing::info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "started enabled servers"
        );
        Ok(report)
    }

    /// Stop every live instance.
    pub async fn stop_all(&self) {
        let servers: Vec<Arc<McpServer>> = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, server)| server)
            .collect();
        join_all(servers.iter().map(|server| server.stop())).await;
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Status of one server: the live instance's, or a `stopped`
    /// placeholder for a persisted config. `None` for unknown names.
    pub fn get_server_status(&self, name: &str) -> Result<Option<ServerStatus>> {
        if let Some(server) = self.instance(name) {
            return Ok(Some(server.status()));
        }
        Ok(self.store.load()?.get(name).map(ServerStatus::stopped))
    }

    /// One status per persisted config, live where an instance exists.
    pub fn get_all_server_statuses(&self) -> Result<Vec<ServerStatus>> {
        let configs = self.store.load()?;
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(configs
            .values()
            .map(|config| match instances.get(&config.name) {
                Some(server) => server.status(),
                None => ServerStatus::stopped(config),
            })
            .collect())
    }

    /// Names of servers currently `running`.
    pub fn running_servers(&self) -> Vec<String> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = instances
            .values()
            .filter(|s| s.status().state == ServerState::Running)
            .map(|s| s.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Invoke a tool on a running server.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::NotFound`] when the server has no instance,
    /// [`McpHostError::NotRunning`] when it is not `running`.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.require_instance(server)?
            .call_tool(tool, arguments)
            .await
    }

    /// Read a resource from a running server.
    pub async fn get_resource(&self, server: &str, uri: &str) -> Result<Vec<ResourceContents>> {
        self.require_instance(server)?.get_resource(uri).await
    }

    fn instance(&self, name: &str) -> Option<Arc<McpServer>> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn require_instance(&self, name: &str) -> Result<Arc<McpServer>> {
        self.instance(name)
            .ok_or_else(|| McpHostError::NotFound(name.to_string()).into())
    }

    /// Drop the map entry only if it is still `server`.
    fn remove_instance(&self, name: &str, server: &Arc<McpServer>) {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(instances.get(name), Some(current) if Arc::ptr_eq(current, server)) {
            instances.remove(name);
        }
    }
}
