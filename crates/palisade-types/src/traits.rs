/// Trait contracts for palisade subsystems.
///
/// Modules code against these interfaces rather than each other's concrete
/// types, so any piece can be replaced by a test double.
use async_trait::async_trait;

use crate::errors::PalisadeError;
use crate::tools::{ToolDefinition, ToolResult};

/// A bundle of one or more tool implementations sharing a lifecycle.
///
/// The dispatcher owns registered plugins and indexes their tools by name.
/// The security layer validates and sanitizes all arguments BEFORE
/// `execute` is called; plugins still should not trust their inputs.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin identifier (e.g. "echo").
    fn name(&self) -> &str;

    /// Semantic version of the plugin.
    fn version(&self) -> &str;

    /// Tool definitions provided by this plugin.
    fn tools(&self) -> Vec<ToolDefinition>;

    /// Execute a tool by name with sanitized arguments.
    ///
    /// Errors are converted by the server into a generic tool-result
    /// failure; the detail reaches the audit log only.
    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, PalisadeError>;

    /// Whether the plugin's prerequisites (API keys, etc.) are met.
    fn is_available(&self) -> bool {
        true
    }

    /// Guidance for making the plugin available when `is_available` is false.
    fn availability_hint(&self) -> String {
        String::new()
    }

    /// Release plugin resources. Called once at server shutdown.
    async fn close(&self) -> Result<(), PalisadeError> {
        Ok(())
    }
}
