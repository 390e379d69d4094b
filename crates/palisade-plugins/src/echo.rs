//! Reference echo plugin.
//!
//! Exercises the full security pipeline end to end: a `message` argument
//! for the schema layer and an optional `path` argument so the path
//! sanitizer is reachable. Real deployments register their own plugins
//! alongside (or instead of) this one.

use async_trait::async_trait;
use serde_json::{json, Value};

use palisade_types::errors::PalisadeError;
use palisade_types::tools::{ToolDefinition, ToolResult};
use palisade_types::traits::Plugin;

pub struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "echo".to_string(),
            description: "Echo a message back, optionally naming a workspace path".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Text to echo back"
                    },
                    "path": {
                        "type": "string",
                        "description": "Optional file path; resolved and policy-checked before the plugin sees it"
                    }
                },
                "required": ["message"]
            }),
        }]
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolResult, PalisadeError> {
        if tool_name != "echo" {
            return Err(PalisadeError::Tool(format!("unknown tool: {tool_name}")));
        }
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let text = match arguments.get("path").and_then(Value::as_str) {
            Some(path) => format!("{message} (path: {path})"),
            None => message.to_string(),
        };
        Ok(ToolResult::text(text))
    }
}
