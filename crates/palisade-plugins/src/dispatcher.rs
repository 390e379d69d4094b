//! Tool dispatcher.
//!
//! Routes tool calls to registered plugins. Two indexes are populated at
//! registration: `tool name → plugin` for O(1) dispatch and `tool name →
//! input schema` so the security layer can validate without touching the
//! plugin. Tool names are unique across all plugins; a collision at
//! registration is a load-time error.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use palisade_types::errors::PalisadeError;
use palisade_types::tools::{ToolDefinition, ToolResult};
use palisade_types::traits::Plugin;

/// Why a dispatch failed.
///
/// `NotFound` becomes a protocol-level error at the server; `Failed` is
/// converted to a generic tool result, with the detail going to audit only.
#[derive(Debug)]
pub enum DispatchError {
    NotFound { tool: String },
    Failed { tool: String, detail: String },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::NotFound { tool } => write!(f, "tool not found: {tool}"),
            DispatchError::Failed { tool, detail } => {
                write!(f, "tool '{tool}' execution failed: {detail}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Routes tool calls to registered plugins.
pub struct ToolDispatcher {
    plugins: Vec<Arc<dyn Plugin>>,
    /// tool name → index into `plugins`
    tool_index: HashMap<String, usize>,
    /// tool name → cached input schema
    schemas: HashMap<String, Value>,
    /// tool names in deterministic listing order (registration, then name)
    listing: Vec<ToolDefinition>,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDispatcher {
    pub fn new() -> ToolDispatcher {
        ToolDispatcher {
            plugins: Vec::new(),
            tool_index: HashMap::new(),
            schemas: HashMap::new(),
            listing: Vec::new(),
        }
    }

    /// Register a plugin and index its tools.
    ///
    /// Fails if any tool name collides with an already-registered one; the
    /// dispatcher is left unchanged in that case.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PalisadeError> {
        let mut tools = plugin.tools();
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        for tool in &tools {
            if self.tool_index.contains_key(&tool.name) {
                return Err(PalisadeError::Tool(format!(
                    "tool name collision: '{}' is already registered",
                    tool.name
                )));
            }
        }

        if !plugin.is_available() {
            let hint = plugin.availability_hint();
            warn!(plugin = plugin.name(), hint = %hint, "plugin registered but not available");
        }

        let index = self.plugins.len();
        for tool in &tools {
            self.tool_index.insert(tool.name.clone(), index);
            self.schemas.insert(tool.name.clone(), tool.input_schema.clone());
        }
        info!(
            plugin = plugin.name(),
            version = plugin.version(),
            tools = tools.len(),
            "registered plugin"
        );
        self.listing.extend(tools);
        self.plugins.push(plugin);
        Ok(())
    }

    /// All tool definitions in deterministic order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.listing.clone()
    }

    /// Cached input schema for a tool.
    pub fn tool_schema(&self, tool: &str) -> Option<&Value> {
        self.schemas.get(tool)
    }

    /// Execute a tool by name.
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<ToolResult, DispatchError> {
        let plugin = self
            .tool_index
            .get(tool)
            .and_then(|i| self.plugins.get(*i))
            .ok_or_else(|| DispatchError::NotFound {
                tool: tool.to_string(),
            })?;

        plugin
            .execute(tool, arguments)
            .await
            .map_err(|e| DispatchError::Failed {
                tool: tool.to_string(),
                detail: e.to_string(),
            })
    }

    /// Close all plugins, in registration order. Close failures are logged
    /// and do not stop the remaining plugins from closing.
    pub async fn close_all(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.close().await {
                warn!(plugin = plugin.name(), error = %e, "plugin close failed");
            }
        }
    }
}
