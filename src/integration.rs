//! Integration layer: keeps a tool registry in step with server status
//!
//! [`McpIntegration`] registers a [`StatusListener`] on the manager. Every
//! `running` snapshot replaces the server's tool set in the registry; any
//! other state removes it. The listener runs inside the status transition,
//! so the registry never holds tools of a server that is not `running`.
//!
//! The add/update/remove/install operations are orchestration over
//! [`McpServerManager`]; none of them speak the protocol.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::catalog::{Catalog, InstallOptions};
use crate::error::{McpHostError, Result};
use crate::mcp::config::ServerConfig;
use crate::mcp::manager::{McpServerManager, StartAllReport};
use crate::mcp::status::{ServerState, ServerStatus, StatusListener};
use crate::tools::{McpToolExecutor, ToolRegistry, ToolResult};

/// Writes discovered tools into the registry as statuses change.
struct RegistrySync {
    registry: Arc<dyn ToolRegistry>,
    manager: Weak<McpServerManager>,
    /// Server name to the tool names it currently owns in the registry.
    mappings: Mutex<HashMap<String, Vec<String>>>,
}

impl RegistrySync {
    fn unregister_all(&self, mappings: &mut HashMap<String, Vec<String>>, server: &str) {
        let Some(tools) = mappings.remove(server) else {
            return;
        };
        for tool in &tools {
            self.registry.unregister(tool);
        }
        tracing::debug!(server, count = tools.len(), "unregistered tools");
    }

    fn register_all(&self, mappings: &mut HashMap<String, Vec<String>>, status: &ServerStatus) {
        let mut owned = Vec::with_capacity(status.tools.len());
        for tool in &status.tools {
            if owned.contains(&tool.name) || self.registry.get(&tool.name).is_some() {
                tracing::warn!(
                    server = %status.name,
                    tool = %tool.name,
                    "tool name already registered, skipping"
                );
                continue;
            }
            let executor = McpToolExecutor::new(
                status.name.clone(),
                tool.clone(),
                Weak::clone(&self.manager),
            );
            self.registry.register(&tool.name, Arc::new(executor));
            owned.push(tool.name.clone());
        }
        tracing::info!(server = %status.name, count = owned.len(), "registered tools");
        mappings.insert(status.name.clone(), owned);
    }
}

impl StatusListener for RegistrySync {
    fn on_status(&self, status: &ServerStatus) {
        let mut mappings = self.mappings.lock().unwrap_or_else(PoisonError::into_inner);
        self.unregister_all(&mut mappings, &status.name);
        if status.state == ServerState::Running {
            self.register_all(&mut mappings, status);
        }
    }
}

/// Connects the manager, the tool registry and the catalog.
pub struct McpIntegration {
    manager: Arc<McpServerManager>,
    registry: Arc<dyn ToolRegistry>,
    sync: Arc<RegistrySync>,
    catalog: Catalog,
    start_on_add: bool,
}

impl McpIntegration {
    /// Wire `registry` to `manager`'s status events.
    pub fn new(manager: Arc<McpServerManager>, registry: Arc<dyn ToolRegistry>) -> Self {
        let sync = Arc::new(RegistrySync {
            registry: Arc::clone(&registry),
            manager: Arc::downgrade(&manager),
            mappings: Mutex::new(HashMap::new()),
        });
        manager.add_listener(Arc::clone(&sync) as Arc<dyn StatusListener>);
        Self {
            manager,
            registry,
            sync,
            catalog: Catalog::builtin(),
            start_on_add: true,
        }
    }

    /// Use a different catalog for installs.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Whether `add_server` starts enabled servers (default `true`).
    pub fn with_start_on_add(mut self, start: bool) -> Self {
        self.start_on_add = start;
        self
    }

    pub fn manager(&self) -> &Arc<McpServerManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Start every enabled, auto-start server.
    pub async fn initialize(&self) -> Result<StartAllReport> {
        self.manager.start_all_enabled().await
    }

    /// Persist a new server and start it when enabled.
    ///
    /// The config stays persisted even if the start fails.
    pub async fn add_server(&self, config: ServerConfig) -> Result<ServerStatus> {
        self.manager.add_config(config.clone()).await?;
        if self.start_on_add && config.enabled {
            return self.manager.start_server(&config).await;
        }
        Ok(ServerStatus::stopped(&config))
    }

    /// Replace a server's config; a running server is restarted with it.
    ///
    /// A config identical to the persisted one is a no-op. A running server
    /// whose new config is disabled is stopped and left stopped.
    pub async fn update_server(&self, config: ServerConfig) -> Result<()> {
        let previous = self.manager.get_config(&config.name)?;
        if previous == config {
            tracing::debug!(server = %config.name, "config unchanged");
            return Ok(());
        }
        self.manager.update_config(config.clone()).await?;

        let running = self
            .manager
            .get_server_status(&config.name)?
            .is_some_and(|s| s.is_running());
        if running {
            tracing::info!(server = %config.name, "restarting server with new config");
            self.manager.stop_server(&config.name).await?;
            if config.enabled {
                self.manager.start_server(&config).await?;
            }
        }
        Ok(())
    }

    /// Stop a server if it runs, then delete its config.
    pub async fn remove_server(&self, name: &str) -> Result<()> {
        self.manager.stop_server(name).await?;
        self.manager.remove_config(name).await?;
        Ok(())
    }

    /// Turn a catalog entry into a server config and add it.
    pub async fn install_from_catalog(
        &self,
        entry: &str,
        options: &InstallOptions,
    ) -> Result<ServerStatus> {
        let config = self.catalog.get(entry)?.to_config(options)?;
        tracing::info!(entry, server = %config.name, "installing from catalog");
        self.add_server(config).await
    }

    /// Run a registered tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::NotFound`] if no tool has this name.
    pub async fn call_tool(&self, tool: &str, args: serde_json::Value) -> Result<ToolResult> {
        let executor = self
            .registry
            .get(tool)
            .ok_or_else(|| McpHostError::NotFound(format!("tool {tool}")))?;
        executor.execute(args).await
    }

    /// Tool names currently registered, by server.
    pub fn registered_tools(&self) -> BTreeMap<String, Vec<String>> {
        self.sync
            .mappings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(server, tools)| (server.clone(), tools.clone()))
            .collect()
    }

    /// Stop every running server.
    pub async fn shutdown(&self) {
        self.manager.stop_all().await;
    }
}
