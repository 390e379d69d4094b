//! MCP connection lifecycle.
//!
//! Tracks the handshake state machine:
//!
//! ```text
//! Uninitialized → Initializing → Ready → ShuttingDown
//! ```
//!
//! `initialize` is accepted only in `Uninitialized`; every other request
//! requires `Ready`. Version negotiation always answers with the server's
//! supported version and lets the client decide whether to proceed.

use serde_json::{json, Map, Value};

use palisade_types::errors::PalisadeError;

/// The protocol version this server speaks.
pub const PROTOCOL_VERSION: &str = "2025-11-25";

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => f.write_str("uninitialized"),
            LifecycleState::Initializing => f.write_str("initializing"),
            LifecycleState::Ready => f.write_str("ready"),
            LifecycleState::ShuttingDown => f.write_str("shutting_down"),
        }
    }
}

/// Handshake manager: state, negotiated client metadata, server identity.
pub struct Lifecycle {
    state: LifecycleState,
    server_name: String,
    server_version: String,
    client_info: Option<Value>,
    client_capabilities: Option<Value>,
}

impl Lifecycle {
    pub fn new(server_name: impl Into<String>, server_version: impl Into<String>) -> Lifecycle {
        Lifecycle {
            state: LifecycleState::Uninitialized,
            server_name: server_name.into(),
            server_version: server_version.into(),
            client_info: None,
            client_capabilities: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    /// Client info captured from `initialize`, if any.
    pub fn client_info(&self) -> Option<&Value> {
        self.client_info.as_ref()
    }

    pub fn client_capabilities(&self) -> Option<&Value> {
        self.client_capabilities.as_ref()
    }

    /// Ensure the connection is ready for operations.
    pub fn require_ready(&self) -> Result<(), PalisadeError> {
        match self.state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::ShuttingDown => {
                Err(PalisadeError::Protocol("connection is shutting down".to_string()))
            }
            _ => Err(PalisadeError::Protocol(format!(
                "connection is not ready (state: {})",
                self.state
            ))),
        }
    }

    /// Handle `initialize`. Accepted only in `Uninitialized`.
    ///
    /// A client offering a different protocol version still receives a
    /// success response carrying the server's version.
    pub fn handle_initialize(&mut self, params: &Map<String, Value>) -> Result<Value, PalisadeError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(PalisadeError::Protocol("server already initialized".to_string()));
        }

        if let Some(offered) = params.get("protocolVersion").and_then(Value::as_str) {
            if offered != PROTOCOL_VERSION {
                tracing::warn!(
                    offered = %offered,
                    supported = PROTOCOL_VERSION,
                    "client offered a different protocol version; answering with ours"
                );
            }
        }

        self.client_info = params.get("clientInfo").cloned();
        self.client_capabilities = params.get("capabilities").cloned();
        self.state = LifecycleState::Initializing;

        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {"listChanged": true}
            },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            },
        }))
    }

    /// Handle the `notifications/initialized` notification.
    pub fn handle_initialized(&mut self) -> Result<(), PalisadeError> {
        if self.state != LifecycleState::Initializing {
            return Err(PalisadeError::Protocol(format!(
                "unexpected initialized notification in state {}",
                self.state
            )));
        }
        self.state = LifecycleState::Ready;
        Ok(())
    }

    /// Begin shutdown; terminal.
    pub fn shutdown(&mut self) {
        self.state = LifecycleState::ShuttingDown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_params(version: &str) -> Map<String, Value> {
        let v = json!({
            "protocolVersion": version,
            "clientInfo": {"name": "t", "version": "1"},
            "capabilities": {},
        });
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_full_handshake() {
        let mut lc = Lifecycle::new("palisade", "0.1.0");
        assert_eq!(lc.state(), LifecycleState::Uninitialized);

        let result = lc.handle_initialize(&init_params(PROTOCOL_VERSION)).unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(result["serverInfo"]["name"], "palisade");
        assert_eq!(lc.state(), LifecycleState::Initializing);

        lc.handle_initialized().unwrap();
        assert!(lc.is_ready());
        assert_eq!(lc.client_info().unwrap()["name"], "t");
    }

    #[test]
    fn test_version_mismatch_still_succeeds_with_server_version() {
        let mut lc = Lifecycle::new("palisade", "0.1.0");
        let result = lc.handle_initialize(&init_params("1999-01-01")).unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    }

    #[test]
    fn test_double_initialize_rejected() {
        let mut lc = Lifecycle::new("palisade", "0.1.0");
        lc.handle_initialize(&init_params(PROTOCOL_VERSION)).unwrap();
        assert!(lc.handle_initialize(&init_params(PROTOCOL_VERSION)).is_err());
    }

    #[test]
    fn test_initialized_before_initialize_rejected() {
        let mut lc = Lifecycle::new("palisade", "0.1.0");
        assert!(lc.handle_initialized().is_err());
    }

    #[test]
    fn test_require_ready_gates_states() {
        let mut lc = Lifecycle::new("palisade", "0.1.0");
        assert!(lc.require_ready().is_err());

        lc.handle_initialize(&init_params(PROTOCOL_VERSION)).unwrap();
        assert!(lc.require_ready().is_err());

        lc.handle_initialized().unwrap();
        assert!(lc.require_ready().is_ok());

        lc.shutdown();
        assert!(lc.require_ready().is_err());
        assert_eq!(lc.state(), LifecycleState::ShuttingDown);
    }

    #[test]
    fn test_missing_client_metadata_is_fine() {
        let mut lc = Lifecycle::new("palisade", "0.1.0");
        lc.handle_initialize(&Map::new()).unwrap();
        assert!(lc.client_info().is_none());
        assert!(lc.client_capabilities().is_none());
    }
}
