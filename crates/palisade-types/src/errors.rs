/// Unified error type for the palisade MCP server.
///
/// All crates use this error type for propagation across crate boundaries.
/// Internal module errors should be converted into the appropriate variant.
#[derive(Debug, thiserror::Error)]
pub enum PalisadeError {
    /// Policy file could not be loaded or failed validation.
    #[error("policy error: {0}")]
    Policy(String),

    /// Error from the audit log (open or write failures).
    #[error("audit error: {0}")]
    Audit(String),

    /// Network access was blocked by the firewall.
    #[error("network blocked: {0}")]
    NetworkBlocked(String),

    /// A URL could not be parsed or uses an unsupported scheme.
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// Input validation failed (schema, path, command, URL, or size).
    #[error("validation error: {0}")]
    Validation(String),

    /// Error from the plugin dispatcher or a tool execution.
    #[error("tool error: {0}")]
    Tool(String),

    /// Protocol constraint violated (lifecycle state, handshake).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PalisadeError {
    fn from(err: serde_json::Error) -> Self {
        PalisadeError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PalisadeError {
    fn from(err: serde_yaml::Error) -> Self {
        PalisadeError::Serialization(err.to_string())
    }
}

/// Rate limit exceeded information, returned by the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitExceeded {
    /// The tool that exceeded the limit.
    pub tool: String,
    /// The configured limit (requests per window).
    pub limit: u32,
    /// Milliseconds until a slot frees up in the window.
    pub retry_after_ms: u64,
}

impl std::fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rate limit exceeded for '{}': {} per window (retry after {}ms)",
            self.tool, self.limit, self.retry_after_ms
        )
    }
}

impl std::error::Error for RateLimitExceeded {}
