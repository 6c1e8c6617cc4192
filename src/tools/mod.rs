//! Tools module for mcp-host
//!
//! This module defines what a callable tool looks like to the rest of the
//! application: a [`ToolExecutor`] that describes itself and runs, the
//! [`ToolResult`] it produces, and the [`ToolRegistry`] interface the
//! integration layer writes discovered tools into.

pub mod mcp_tool;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

pub use mcp_tool::McpToolExecutor;

/// Tool definition structure
///
/// Represents a tool in the function calling format advertised to a model:
/// a name, a description and a JSON schema for the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Name of the tool
    pub name: String,
    /// Description of what the tool does
    pub description: String,
    /// JSON schema for the tool's parameters
    pub parameters: serde_json::Value,
}

impl Tool {
    /// Create a new tool definition
    ///
    /// # Arguments
    ///
    /// * `name` - Tool name
    /// * `description` - Tool description
    /// * `parameters` - JSON schema for parameters
    ///
    /// # Returns
    ///
    /// Returns a new Tool instance
    pub fn new(name: String, description: String, parameters: serde_json::Value) -> Self {
        Self {
            name,
            description,
            parameters,
        }
    }
}

/// Tool result structure
///
/// Represents the result of a tool execution with metadata
/// and truncation support.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if execution failed
    pub error: Option<String>,
    /// Whether the output was truncated
    pub truncated: bool,
    /// Additional metadata about the execution
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful tool result
    ///
    /// # Arguments
    ///
    /// * `output` - Tool output
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed tool result
    ///
    /// # Arguments
    ///
    /// * `error` - Error message
    pub fn error(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the result
    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Truncate output if it exceeds the maximum size
    ///
    /// Truncation backs off to the nearest character boundary.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum size in bytes
    pub fn truncate_if_needed(mut self, max_size: usize) -> Self {
        if self.output.len() > max_size {
            let mut cut = max_size;
            while !self.output.is_char_boundary(cut) {
                cut -= 1;
            }
            self.output.truncate(cut);
            self.output.push_str("\n... (truncated)");
            self.truncated = true;
        }
        self
    }

    /// Convert to a display string
    pub fn to_message(&self) -> String {
        if self.success {
            if self.truncated {
                format!("{}\n(Output truncated)", self.output)
            } else {
                self.output.clone()
            }
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            )
        }
    }
}

/// Tool executor trait for implementing tool execution logic
///
/// # Examples
///
/// ```no_run
/// use mcp_host::tools::{ToolExecutor, ToolResult};
/// use mcp_host::error::Result;
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct MyTool;
///
/// #[async_trait]
/// impl ToolExecutor for MyTool {
///     fn tool_definition(&self) -> Value {
///         serde_json::json!({
///             "name": "my_tool",
///             "description": "Does something useful",
///             "parameters": {
///                 "type": "object",
///                 "properties": {}
///             }
///         })
///     }
///
///     async fn execute(&self, _args: Value) -> Result<ToolResult> {
///         Ok(ToolResult::success("Success".to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool definition as a JSON value
    ///
    /// The definition has the shape of [`Tool`]:
    /// ```json
    /// {
    ///   "name": "tool_name",
    ///   "description": "Tool description",
    ///   "parameters": { "type": "object", "properties": {} }
    /// }
    /// ```
    fn tool_definition(&self) -> serde_json::Value;

    /// Executes the tool with the given arguments
    ///
    /// # Errors
    ///
    /// Returns error if the tool could not be reached. A tool that ran and
    /// reported failure returns `Ok` with a failed [`ToolResult`].
    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult>;
}

/// The shared catalog of callable tools.
///
/// Only the integration layer writes to a registry; anything may read it.
pub trait ToolRegistry: Send + Sync {
    /// Add or replace a tool under `name`.
    fn register(&self, name: &str, executor: Arc<dyn ToolExecutor>);

    /// Remove a tool, returning it if it was present.
    fn unregister(&self, name: &str) -> Option<Arc<dyn ToolExecutor>>;

    /// Look up a tool by name.
    fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>>;

    /// Names of every registered tool, sorted.
    fn list(&self) -> Vec<String>;
}

/// A [`ToolRegistry`] held in process memory.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn ToolExecutor>>>,
}

impl InMemoryToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all tool definitions as JSON values, ordered by name
    pub fn all_definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|executor| executor.tool_definition())
            .collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn register(&self, name: &str, executor: Arc<dyn ToolExecutor>) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), executor);
    }

    fn unregister(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn list(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_creation() {
        let tool = Tool::new(
            "test_tool".to_string(),
            "A test tool".to_string(),
            serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        );
        assert_eq!(tool.name, "test_tool");
        assert_eq!(tool.description, "A test tool");
    }

    #[test]
    fn test_tool_result_success() {
        let result = ToolResult::success("output".to_string());
        assert!(result.success);
        assert_eq!(result.output, "output");
        assert!(result.error.is_none());
        assert!(!result.truncated);
    }

    #[test]
    fn test_tool_result_error() {
        let result = ToolResult::error("failed".to_string());
        assert!(!result.success);
        assert_eq!(result.error, Some("failed".to_string()));
        assert_eq!(result.to_message(), "Error: failed");
    }

    #[test]
    fn test_tool_result_truncation_respects_char_boundary() {
        let result = ToolResult::success("ééééé".to_string()).truncate_if_needed(3);
        assert!(result.truncated);
        assert!(result.output.starts_with('é'));
        assert!(result.to_message().contains("truncated"));
    }

    #[test]
    fn test_tool_result_no_truncation() {
        let result = ToolResult::success("short".to_string()).truncate_if_needed(100);
        assert!(!result.truncated);
        assert_eq!(result.to_message(), "short");
    }

    struct MockToolExecutor {
        name: String,
    }

    #[async_trait]
    impl ToolExecutor for MockToolExecutor {
        fn tool_definition(&self) -> serde_json::Value {
            serde_json::json!({
                "name": self.name,
                "description": "Mock tool",
                "parameters": {"type": "object"}
            })
        }

        async fn execute(&self, _args: serde_json::Value) -> crate::error::Result<ToolResult> {
            Ok(ToolResult::success("mock output".to_string()))
        }
    }

    fn mock(name: &str) -> Arc<dyn ToolExecutor> {
        Arc::new(MockToolExecutor {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_registry_register_get_unregister() {
        let registry = InMemoryToolRegistry::new();
        assert!(registry.is_empty());

        registry.register("b", mock("b"));
        registry.register("a", mock("a"));
        assert_eq!(registry.list(), vec!["a", "b"]);
        assert!(registry.get("a").is_some());

        assert!(registry.unregister("a").is_some());
        assert!(registry.unregister("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_all_definitions_ordered() {
        let registry = InMemoryToolRegistry::new();
        registry.register("test2", mock("test2"));
        registry.register("test1", mock("test1"));

        let all = registry.all_definitions();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["name"], "test1");
    }

    #[tokio::test]
    async fn test_tool_executor_execution() {
        let result = mock("test").execute(serde_json::json!({})).await.unwrap();
        assert!(result.success);
    }
}
