//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! This module provides two types that represent the two phases of a
//! session:
//!
//! - [`McpProtocol`] -- an uninitialized client. Call
//!   [`McpProtocol::initialize`] to perform the `initialize` /
//!   `notifications/initialized` handshake and receive an
//!   [`InitializedMcpProtocol`].
//! - [`InitializedMcpProtocol`] -- a negotiated session. Discovery
//!   ([`InitializedMcpProtocol::discover`]) and the typed calls used after
//!   start-up (`tools/call`, `resources/read`, `ping`) live here.
//!
//! # Design
//!
//! All pagination is handled internally: `list_tools`, `list_resources`, and
//! `list_prompts` follow `nextCursor` until the server stops returning one or
//! repeats a cursor it already sent.
//!
//! Neither type owns a transport; callers wire one up with
//! [`crate::mcp::client::connect`] and pass the resulting client in.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListPromptsResponse, ListResourcesResponse, ListToolsResponse, McpTool,
    PaginatedParams, Prompt, ReadResourceParams, ReadResourceResponse, Resource,
    ResourceContents, ServerCapabilities, KNOWN_PROTOCOL_VERSIONS, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_PING, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST,
    METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PROTOCOL_VERSION,
};

// ---------------------------------------------------------------------------
// Capability flag enum
// ---------------------------------------------------------------------------

/// Identifies a capability category a server may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapabilityFlag {
    /// `tools/list` and `tools/call`.
    Tools,
    /// `resources/list` and `resources/read`.
    Resources,
    /// `prompts/list`.
    Prompts,
    /// Log notifications.
    Logging,
}

/// The catalogs collected after a handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Discovery {
    /// Tools advertised by `tools/list`.
    pub tools: Vec<McpTool>,
    /// Resources advertised by `resources/list`.
    pub resources: Vec<Resource>,
    /// Prompts advertised by `prompts/list`.
    pub prompts: Vec<Prompt>,
}

// ---------------------------------------------------------------------------
// McpProtocol -- uninitialized session
// ---------------------------------------------------------------------------

/// An uninitialized MCP client session.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use mcp_host::mcp::client::JsonRpcClient;
/// use mcp_host::mcp::protocol::McpProtocol;
///
/// let (tx, _rx) = mpsc::unbounded_channel::<String>();
/// let _proto = McpProtocol::new(Arc::new(JsonRpcClient::new("echo", tx)));
/// ```
#[derive(Debug)]
pub struct McpProtocol {
    client: Arc<JsonRpcClient>,
}

impl McpProtocol {
    /// Create a new uninitialized session over a wired client.
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    ///
    /// Every capability category is declared as an empty object. A peer that
    /// answers with an unknown protocol revision is logged, not rejected.
    /// After the `initialized` notification the call pauses for `grace` so
    /// the peer can finish its own post-handshake setup.
    ///
    /// # Errors
    ///
    /// Any failure of the `initialize` request (timeout, RPC error, closed
    /// channel, malformed reply) is returned unchanged.
    pub async fn initialize(
        self,
        client_info: Implementation,
        grace: Duration,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ClientCapabilities::all_categories(),
                    client_info,
                },
                None,
            )
            .await?;

        if !KNOWN_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            tracing::warn!(
                server = %self.client.server_name(),
                version = %response.protocol_version,
                "server selected an unrecognised protocol version"
            );
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

// ---------------------------------------------------------------------------
// InitializedMcpProtocol -- negotiated session
// ---------------------------------------------------------------------------

/// A negotiated MCP client session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    client: Arc<JsonRpcClient>,
    /// The server's response to the `initialize` request.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    pub fn client(&self) -> &Arc<JsonRpcClient> {
        &self.client
    }

    /// Capabilities the server declared.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.initialize_response.capabilities
    }

    /// The server's self-description, when it sent one.
    pub fn server_info(&self) -> Option<&Implementation> {
        self.initialize_response.server_info.as_ref()
    }

    /// Check whether the server advertises a capability category.
    pub fn capable(&self, capability: ServerCapabilityFlag) -> bool {
        let caps = &self.initialize_response.capabilities;
        match capability {
            ServerCapabilityFlag::Tools => caps.tools.is_some(),
            ServerCapabilityFlag::Resources => caps.resources.is_some(),
            ServerCapabilityFlag::Prompts => caps.prompts.is_some(),
            ServerCapabilityFlag::Logging => caps.logging.is_some(),
        }
    }

    /// Populate every catalog the server advertises.
    ///
    /// Categories missing from the declared capabilities are skipped without
    /// a request. A list call that fails is logged and leaves that catalog
    /// empty; discovery itself never fails.
    pub async fn discover(&self) -> Discovery {
        let server = self.client.server_name();
        let mut discovery = Discovery::default();

        if self.capable(ServerCapabilityFlag::Tools) {
            match self.list_tools().await {
                Ok(tools) => discovery.tools = tools,
                Err(e) => tracing::warn!(server, "tools/list failed: {e:#}"),
            }
        }
        if self.capable(ServerCapabilityFlag::Resources) {
            match self.list_resources().await {
                Ok(resources) => discovery.resources = resources,
                Err(e) => tracing::warn!(server, "resources/list failed: {e:#}"),
            }
        }
        if self.capable(ServerCapabilityFlag::Prompts) {
            match self.list_prompts().await {
                Ok(prompts) => discovery.prompts = prompts,
                Err(e) => tracing::warn!(server, "prompts/list failed: {e:#}"),
            }
        }

        tracing::debug!(
            server,
            tools = discovery.tools.len(),
            resources = discovery.resources.len(),
            prompts = discovery.prompts.len(),
            "discovery complete"
        );
        discovery
    }

    /// List all tools advertised by the server, following pagination.
    ///
    /// # Errors
    ///
    /// Returns an error if any paged request fails.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.list_paged(METHOD_TOOLS_LIST, |resp: ListToolsResponse| {
            (resp.tools, resp.next_cursor)
        })
        .await
    }

    /// List all resources advertised by the server, following pagination.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.list_paged(METHOD_RESOURCES_LIST, |resp: ListResourcesResponse| {
            (resp.resources, resp.next_cursor)
        })
        .await
    }

    /// List all prompts advertised by the server, following pagination.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.list_paged(METHOD_PROMPTS_LIST, |resp: ListPromptsResponse| {
            (resp.prompts, resp.next_cursor)
        })
        .await
    }

    /// Request pages of `method` until the server stops returning a cursor.
    ///
    /// A cursor that was already followed ends the listing with a warning;
    /// the items gathered so far are kept.
    async fn list_paged<R, T>(
        &self,
        method: &str,
        split: impl Fn(R) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        R: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut followed = HashSet::new();

        loop {
            let resp: R = self
                .client
                .request(method, PaginatedParams { cursor }, None)
                .await?;
            let (page, next_cursor) = split(resp);
            items.extend(page);

            match next_cursor {
                Some(c) if !c.is_empty() => {
                    if !followed.insert(c.clone()) {
                        tracing::warn!(
                            server = self.client.server_name(),
                            method,
                            cursor = %c,
                            "server repeated a pagination cursor; stopping"
                        );
                        break;
                    }
                    cursor = Some(c);
                }
                _ => break,
            }
        }

        Ok(items)
    }

    /// Invoke a named tool on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns a
    /// JSON-RPC error. A tool that reports failure through `isError` is a
    /// successful call.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let resp: ReadResourceResponse = self
            .client
            .request(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
                None,
            )
            .await?;
        Ok(resp.contents)
    }

    /// Round-trip a `ping` request.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .request(METHOD_PING, serde_json::json!({}), None)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
