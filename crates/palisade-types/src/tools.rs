//! Shared tool types: definitions, results, and content blocks.
//!
//! These shapes mirror the MCP wire format: `ToolDefinition` serializes
//! with the `inputSchema` key and `ToolResult` with `isError`, so handlers
//! can embed them in responses without re-mapping.

use serde::{Deserialize, Serialize};

/// Definition of a tool provided by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name across all registered plugins.
    pub name: String,
    /// Human-readable description shown to the MCP host.
    pub description: String,
    /// JSON Schema (Draft 2020-12) for the tool's arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// One block of tool output content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

/// Result of a tool execution.
///
/// Tool-level failures (policy, validation, rate limit, timeout, plugin
/// error) are expressed here with `is_error = true`; they are never
/// surfaced as JSON-RPC errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Ordered output content.
    pub content: Vec<ContentBlock>,
    /// Whether this result represents a failure.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A failed single-text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definition_uses_mcp_field_names() {
        let def = ToolDefinition {
            name: "echo".to_string(),
            description: "Echo a message".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_value(&def).unwrap();
        assert!(json.get("inputSchema").is_some());
        assert!(json.get("input_schema").is_none());
    }

    #[test]
    fn test_tool_result_serialization() {
        let result = ToolResult::error("Rate limit exceeded");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "Rate limit exceeded");
    }

    #[test]
    fn test_content_block_variants_roundtrip() {
        let blocks = vec![
            ContentBlock::Text {
                text: "hi".to_string(),
            },
            ContentBlock::Image {
                data: "aGk=".to_string(),
                mime_type: "image/png".to_string(),
            },
            ContentBlock::Resource {
                uri: "file:///tmp/x".to_string(),
                mime_type: "text/plain".to_string(),
                text: None,
            },
        ];
        for block in blocks {
            let json = serde_json::to_string(&block).unwrap();
            let back: ContentBlock = serde_json::from_str(&json).unwrap();
            assert_eq!(back, block);
        }
    }
}
