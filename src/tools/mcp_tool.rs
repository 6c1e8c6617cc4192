//! A discovered MCP tool exposed as a [`ToolExecutor`]

use std::sync::Weak;

use async_trait::async_trait;

use crate::error::{McpHostError, Result};
use crate::mcp::manager::McpServerManager;
use crate::mcp::types::{CallToolResponse, McpTool, ResourceContents, ToolResponseContent};
use crate::tools::{Tool, ToolExecutor, ToolResult};

/// Calls one tool on one server through the manager.
///
/// The manager is held weakly: the registry that owns this executor is
/// itself reachable from the manager's status listeners.
pub struct McpToolExecutor {
    server: String,
    tool: McpTool,
    manager: Weak<McpServerManager>,
}

impl McpToolExecutor {
    pub fn new(server: impl Into<String>, tool: McpTool, manager: Weak<McpServerManager>) -> Self {
        Self {
            server: server.into(),
            tool,
            manager,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn tool_name(&self) -> &str {
        &self.tool.name
    }

    /// The definition advertised for this tool.
    pub fn definition(&self) -> Tool {
        Tool::new(
            self.tool.name.clone(),
            self.tool.description.clone().unwrap_or_default(),
            self.tool.input_schema.clone(),
        )
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    fn tool_definition(&self) -> serde_json::Value {
        serde_json::to_value(self.definition()).unwrap_or(serde_json::Value::Null)
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult> {
        let manager = self.manager.upgrade().ok_or_else(|| {
            McpHostError::NotRunning(self.server.clone())
        })?;
        let arguments = match args {
            serde_json::Value::Null => None,
            other => Some(other),
        };

        let response = manager
            .call_tool(&self.server, &self.tool.name, arguments)
            .await?;

        Ok(into_tool_result(response)
            .with_metadata("server".to_string(), self.server.clone())
            .with_metadata("tool".to_string(), self.tool.name.clone()))
    }
}

/// Flatten a `tools/call` reply into a [`ToolResult`].
///
/// Text items are joined with newlines; other items are summarised. When the
/// reply has no content but carries structured output, that is rendered as
/// JSON instead.
pub fn into_tool_result(response: CallToolResponse) -> ToolResult {
    let mut parts: Vec<String> = response.content.iter().map(describe_content).collect();
    if parts.is_empty() {
        if let Some(structured) = &response.structured_content {
            parts.push(structured.to_string());
        }
    }
    let output = parts.join("\n");

    if response.is_error.unwrap_or(false) {
        let message = if output.is_empty() {
            "tool reported an error".to_string()
        } else {
            output
        };
        ToolResult::error(message)
    } else {
        ToolResult::success(output)
    }
}

fn describe_content(item: &ToolResponseContent) -> String {
    match item {
        ToolResponseContent::Text { text } => text.clone(),
        ToolResponseContent::Image { mime_type, .. } => format!("[image: {mime_type}]"),
        ToolResponseContent::Audio { mime_type, .. } => format!("[audio: {mime_type}]"),
        ToolResponseContent::Resource { resource } => match resource {
            ResourceContents::Text(text) => text.text.clone(),
            ResourceContents::Blob(blob) => format!("[resource: {}]", blob.uri),
        },
    }
}
