//! Server orchestration for the palisade MCP server.
//!
//! [`Server`] owns the policy, security engine, dispatcher, and lifecycle,
//! and routes every incoming JSON-RPC message. `tools/call` runs the full
//! security pipeline:
//!
//! ```text
//! state gate → schema lookup → rate limit → input validation →
//! audit request → plugin (under timeout) → audit response
//! ```
//!
//! Tool-level failures (rate limit, validation, timeout, plugin error) are
//! returned as tool results with `isError: true`, never as JSON-RPC
//! errors. JSON-RPC errors are reserved for malformed messages, wrong
//! lifecycle state, unknown methods, and unknown tools.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use palisade_plugins::dispatcher::{DispatchError, ToolDispatcher};
use palisade_protocol::jsonrpc::{
    self, format_error, format_notification, format_response, parse_message, Incoming,
    Notification, Request, RpcError,
};
use palisade_protocol::lifecycle::Lifecycle;
use palisade_security::SecurityEngine;
use palisade_types::errors::PalisadeError;
use palisade_types::policy::SecurityPolicy;
use palisade_types::tools::ToolResult;
use palisade_types::traits::Plugin;

pub const SERVER_NAME: &str = "palisade";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The MCP server: message routing around the security pipeline.
pub struct Server {
    lifecycle: Lifecycle,
    dispatcher: ToolDispatcher,
    engine: SecurityEngine,
}

impl Server {
    /// Build a server for a loaded policy. Opens the security engine (and
    /// with it the audit log); failure here is a configuration error.
    pub fn new(policy: Arc<SecurityPolicy>) -> Result<Server, PalisadeError> {
        let engine = SecurityEngine::open(policy)?;
        Ok(Server {
            lifecycle: Lifecycle::new(SERVER_NAME, SERVER_VERSION),
            dispatcher: ToolDispatcher::new(),
            engine,
        })
    }

    /// Register a plugin.
    ///
    /// When the connection is already Ready, returns the
    /// `notifications/tools/list_changed` payload for the transport loop
    /// to emit.
    pub fn register_plugin(
        &mut self,
        plugin: Arc<dyn Plugin>,
    ) -> Result<Option<String>, PalisadeError> {
        self.dispatcher.register_plugin(plugin)?;
        Ok(self
            .lifecycle
            .is_ready()
            .then(|| format_notification("notifications/tools/list_changed", None)))
    }

    /// Handle one raw message line. Returns the response to write, or
    /// `None` for notifications.
    pub async fn handle_message(&mut self, raw: &str) -> Option<String> {
        match parse_message(raw) {
            Err(e) => Some(format_error(None, &e)),
            Ok(Incoming::Notification(n)) => {
                self.handle_notification(n);
                None
            }
            Ok(Incoming::Request(req)) => Some(self.handle_request(req).await),
        }
    }

    fn handle_notification(&mut self, notification: Notification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                if let Err(e) = self.lifecycle.handle_initialized() {
                    // Protocol errors on notifications produce no response
                    warn!(error = %e, "ignoring misplaced initialized notification");
                }
            }
            other => debug!(method = %other, "ignoring notification"),
        }
    }

    async fn handle_request(&mut self, request: Request) -> String {
        // initialize is the one method allowed before Ready.
        if request.method == "initialize" {
            return match self.lifecycle.handle_initialize(&request.params) {
                Ok(result) => format_response(&request.id, result),
                Err(e) => format_error(
                    Some(&request.id),
                    &RpcError::new(jsonrpc::INVALID_REQUEST, e.to_string()),
                ),
            };
        }

        if let Err(e) = self.lifecycle.require_ready() {
            return format_error(
                Some(&request.id),
                &RpcError::new(jsonrpc::INVALID_REQUEST, e.to_string()),
            );
        }

        match request.method.as_str() {
            "tools/list" => {
                let tools = self.dispatcher.list_tools();
                format_response(&request.id, json!({ "tools": tools }))
            }
            "tools/call" => self.handle_tools_call(request).await,
            other => format_error(
                Some(&request.id),
                &RpcError::new(jsonrpc::METHOD_NOT_FOUND, format!("unknown method: {other}")),
            ),
        }
    }

    async fn handle_tools_call(&mut self, request: Request) -> String {
        let Some(name) = request.params.get("name").and_then(Value::as_str) else {
            return format_error(
                Some(&request.id),
                &RpcError::new(jsonrpc::INVALID_PARAMS, "missing tool name"),
            );
        };
        let name = name.to_string();

        let arguments = match request.params.get("arguments") {
            None => json!({}),
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => {
                return format_error(
                    Some(&request.id),
                    &RpcError::new(jsonrpc::INVALID_PARAMS, "arguments must be an object"),
                );
            }
        };

        // Unknown tool is a protocol error, not a tool result.
        let Some(schema) = self.dispatcher.tool_schema(&name).cloned() else {
            return format_error(
                Some(&request.id),
                &RpcError::new(jsonrpc::INVALID_PARAMS, format!("unknown tool {name}")),
            );
        };

        if self.engine.check_rate(&name).is_err() {
            return self.tool_result_response(&request, ToolResult::error("Rate limit exceeded"));
        }

        let cleaned = match self.engine.check_input(&name, &schema, &arguments).await {
            Ok(cleaned) => cleaned,
            Err(_) => {
                return self
                    .tool_result_response(&request, ToolResult::error("Input validation failed"));
            }
        };

        let request_id = request.id.to_string();
        self.engine.on_request(&request_id, &name, &cleaned);
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            self.engine.timeout(),
            self.dispatcher.call(&name, cleaned),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(_elapsed) => {
                self.engine.on_security_event(
                    "timeout",
                    json!({
                        "tool": name,
                        "timeout_seconds": self.engine.timeout().as_secs(),
                    }),
                );
                ToolResult::error("Tool execution timed out")
            }
            Ok(Err(DispatchError::NotFound { tool })) => {
                // Schema lookup above makes this unreachable in practice
                ToolResult::error(format!("Tool '{tool}' execution failed"))
            }
            Ok(Err(DispatchError::Failed { tool, detail })) => {
                self.engine
                    .on_security_event("plugin_error", json!({"tool": tool, "detail": detail}));
                ToolResult::error(format!("Tool '{tool}' execution failed"))
            }
            Ok(Ok(result)) => result,
        };

        let status = if result.is_error { "error" } else { "success" };
        self.engine.on_response(&request_id, status, duration_ms);
        self.tool_result_response(&request, result)
    }

    fn tool_result_response(&self, request: &Request, result: ToolResult) -> String {
        match serde_json::to_value(&result) {
            Ok(value) => format_response(&request.id, value),
            Err(e) => format_error(
                Some(&request.id),
                &RpcError::new(jsonrpc::INTERNAL_ERROR, e.to_string()),
            ),
        }
    }

    /// Shut down: stop accepting requests, close plugins, flush audit.
    pub async fn close(&mut self) {
        self.lifecycle.shutdown();
        self.dispatcher.close_all().await;
        let dropped = self.engine.close();
        info!(dropped_audit_records = dropped, "server closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use palisade_protocol::lifecycle::PROTOCOL_VERSION;
    use palisade_types::tools::ToolDefinition;
    use std::path::Path;

    fn test_policy(dir: &Path) -> Arc<SecurityPolicy> {
        let yaml = format!(
            r#"
version: "1.0"
network:
  allowed_ranges: ["127.0.0.0/8"]
filesystem:
  allowed_paths: ["{0}/**"]
  denied_paths: ["**/.ssh/**"]
commands:
  blocked: ["rm"]
tools:
  timeout: 5
  rate_limits:
    echo: 2
    default: 100
audit:
  log_file: "{0}/audit.jsonl"
"#,
            dir.display()
        );
        Arc::new(SecurityPolicy::from_yaml(&yaml).unwrap())
    }

    async fn ready_server(dir: &Path) -> Server {
        let mut server = Server::new(test_policy(dir)).unwrap();
        server
            .register_plugin(Arc::new(palisade_plugins::EchoPlugin))
            .unwrap();
        handshake(&mut server).await;
        server
    }

    async fn handshake(server: &mut Server) {
        let init = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"initialize","params":{{"protocolVersion":"{PROTOCOL_VERSION}","clientInfo":{{"name":"t","version":"1"}},"capabilities":{{}}}}}}"#
        );
        let response = server.handle_message(&init).await.unwrap();
        let v: Value = serde_json::from_str(&response).unwrap();
        assert!(v.get("error").is_none(), "handshake failed: {response}");
        let none = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(none.is_none());
    }

    async fn call_tool(server: &mut Server, id: u64, name: &str, args: Value) -> Value {
        let raw = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": args},
        })
        .to_string();
        let response = server.handle_message(&raw).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    fn audit_records(dir: &Path, server: &Server) -> Vec<Value> {
        server.engine.close();
        match std::fs::read_to_string(dir.join("audit.jsonl")) {
            Ok(text) => text
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    // ---- Scenario 1: initialization handshake ----

    #[tokio::test]
    async fn test_handshake_returns_server_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(test_policy(dir.path())).unwrap();
        let init = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"initialize","params":{{"protocolVersion":"{PROTOCOL_VERSION}","clientInfo":{{"name":"t","version":"1"}},"capabilities":{{}}}}}}"#
        );
        let v: Value =
            serde_json::from_str(&server.handle_message(&init).await.unwrap()).unwrap();
        assert_eq!(v["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(v["result"]["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(v["result"]["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn test_tools_list_before_initialized_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(test_policy(dir.path())).unwrap();
        let init = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"initialize","params":{{"protocolVersion":"{PROTOCOL_VERSION}"}}}}"#
        );
        server.handle_message(&init).await.unwrap();

        // Initializing, not yet Ready
        let raw = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#;
        let v: Value = serde_json::from_str(&server.handle_message(raw).await.unwrap()).unwrap();
        assert_eq!(v["error"]["code"], jsonrpc::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_request_before_initialize_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(test_policy(dir.path())).unwrap();
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#;
        let v: Value = serde_json::from_str(&server.handle_message(raw).await.unwrap()).unwrap();
        assert_eq!(v["error"]["code"], jsonrpc::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_version_mismatch_answers_with_server_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(test_policy(dir.path())).unwrap();
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"1999-01-01"}}"#;
        let v: Value = serde_json::from_str(&server.handle_message(raw).await.unwrap()).unwrap();
        assert_eq!(v["result"]["protocolVersion"], PROTOCOL_VERSION);
    }

    // ---- tools/list ----

    #[tokio::test]
    async fn test_tools_list_after_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let raw = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#;
        let v: Value = serde_json::from_str(&server.handle_message(raw).await.unwrap()).unwrap();
        let tools = v["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");
        assert!(tools[0]["inputSchema"].is_object());
    }

    // ---- Scenario 2: unknown tool ----

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let v = call_tool(&mut server, 2, "nope", json!({})).await;
        assert_eq!(v["error"]["code"], jsonrpc::INVALID_PARAMS);
        assert!(v["error"]["message"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let raw = r#"{"jsonrpc":"2.0","id":9,"method":"resources/list","params":{}}"#;
        let v: Value = serde_json::from_str(&server.handle_message(raw).await.unwrap()).unwrap();
        assert_eq!(v["error"]["code"], jsonrpc::METHOD_NOT_FOUND);
    }

    // ---- Successful call + audit invariant ----

    #[tokio::test]
    async fn test_successful_call_audits_request_and_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let v = call_tool(&mut server, 7, "echo", json!({"message": "hello"})).await;
        assert_eq!(v["result"]["isError"], false);
        assert_eq!(v["result"]["content"][0]["text"], "hello");

        let records = audit_records(dir.path(), &server);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["kind"], "request");
        assert_eq!(records[1]["kind"], "response");
        assert_eq!(records[0]["request_id"], "7");
        assert_eq!(records[1]["request_id"], "7");
        assert_eq!(records[1]["status"], "success");
        assert!(records[1]["duration_ms"].as_u64().is_some());
    }

    // ---- Scenario 3: path traversal ----

    #[tokio::test]
    async fn test_path_traversal_blocked_with_audit_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let traversal = format!("{}/../../../etc/passwd", dir.path().display());
        let v = call_tool(
            &mut server,
            3,
            "echo",
            json!({"message": "x", "path": traversal}),
        )
        .await;
        assert_eq!(v["result"]["isError"], true);
        assert_eq!(v["result"]["content"][0]["text"], "Input validation failed");

        let records = audit_records(dir.path(), &server);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["event_type"], "validation_failed");
    }

    #[tokio::test]
    async fn test_denied_glob_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let canon = dir.path().canonicalize().unwrap();
        let mut server = ready_server(&canon).await;
        std::fs::create_dir_all(canon.join(".ssh")).unwrap();
        std::fs::write(canon.join(".ssh/id_rsa"), "k").unwrap();

        let v = call_tool(
            &mut server,
            4,
            "echo",
            json!({"message": "x", "path": format!("{}/.ssh/id_rsa", canon.display())}),
        )
        .await;
        assert_eq!(v["result"]["isError"], true);
    }

    #[tokio::test]
    async fn test_clean_path_reaches_plugin_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let canon = dir.path().canonicalize().unwrap();
        let mut server = ready_server(&canon).await;
        std::fs::write(canon.join("f.txt"), "x").unwrap();

        let v = call_tool(
            &mut server,
            5,
            "echo",
            json!({"message": "m", "path": format!("{}/sub/../f.txt", canon.display())}),
        )
        .await;
        assert_eq!(v["result"]["isError"], false);
        let text = v["result"]["content"][0]["text"].as_str().unwrap();
        assert!(
            text.contains(&format!("{}/f.txt", canon.display())),
            "plugin should see the canonical path: {text}"
        );
    }

    // ---- Scenario 4: rate limit ----

    #[tokio::test]
    async fn test_rate_limit_third_call_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;

        for id in [10, 11] {
            let v = call_tool(&mut server, id, "echo", json!({"message": "hi"})).await;
            assert_eq!(v["result"]["isError"], false, "call {id}");
        }
        let v = call_tool(&mut server, 12, "echo", json!({"message": "hi"})).await;
        assert_eq!(v["result"]["isError"], true);
        assert_eq!(v["result"]["content"][0]["text"], "Rate limit exceeded");

        let events: Vec<Value> = audit_records(dir.path(), &server)
            .into_iter()
            .filter(|r| r["kind"] == "security_event")
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event_type"], "rate_limit_exceeded");
        // The rejected call produced no request/response records
        let with_id_12: Vec<Value> = audit_records(dir.path(), &server)
            .into_iter()
            .filter(|r| r["request_id"] == "12")
            .collect();
        assert!(with_id_12.is_empty());
    }

    // ---- Scenario 5: oversized message ----

    #[tokio::test]
    async fn test_oversized_message_rejected_with_null_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let raw = format!(
            r#"{{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{{"name":"echo","arguments":{{"message":"{}"}}}}}}"#,
            "x".repeat(1_500_000)
        );
        let v: Value = serde_json::from_str(&server.handle_message(&raw).await.unwrap()).unwrap();
        assert_eq!(v["error"]["code"], jsonrpc::INVALID_REQUEST);
        assert!(v["id"].is_null());

        // No plugin ran, no audit records were written
        assert!(audit_records(dir.path(), &server).is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let v: Value =
            serde_json::from_str(&server.handle_message("{broken").await.unwrap()).unwrap();
        assert_eq!(v["error"]["code"], jsonrpc::PARSE_ERROR);
        assert!(v["id"].is_null());
    }

    // ---- Scenario 6: network rejection ----

    #[tokio::test]
    async fn test_forbidden_url_argument_blocked_with_network_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let v = call_tool(
            &mut server,
            8,
            "echo",
            json!({"message": "x", "image_url": "http://8.8.8.8/"}),
        )
        .await;
        assert_eq!(v["result"]["isError"], true);

        let records = audit_records(dir.path(), &server);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["event_type"], "network_blocked");
        assert_eq!(records[0]["detail"]["reason"], "not_in_allowed_range");
    }

    // ---- Timeout ----

    struct SleepyPlugin;

    #[async_trait]
    impl Plugin for SleepyPlugin {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn tools(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "sleep".to_string(),
                description: "sleeps past the timeout".to_string(),
                input_schema: json!({"type": "object"}),
            }]
        }
        async fn execute(
            &self,
            _tool_name: &str,
            _arguments: Value,
        ) -> Result<ToolResult, PalisadeError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(ToolResult::text("never"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_produces_tool_result_and_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(test_policy(dir.path())).unwrap();
        server.register_plugin(Arc::new(SleepyPlugin)).unwrap();
        handshake(&mut server).await;

        let v = call_tool(&mut server, 20, "sleep", json!({})).await;
        assert_eq!(v["result"]["isError"], true);
        assert_eq!(v["result"]["content"][0]["text"], "Tool execution timed out");

        let records = audit_records(dir.path(), &server);
        let kinds: Vec<&str> = records
            .iter()
            .map(|r| r["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["request", "security_event", "response"]);
        assert_eq!(records[1]["event_type"], "timeout");
        assert_eq!(records[2]["status"], "error");
    }

    // ---- Plugin failure ----

    struct FailingPlugin;

    #[async_trait]
    impl Plugin for FailingPlugin {
        fn name(&self) -> &str {
            "failing"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn tools(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "explode".to_string(),
                description: "always fails".to_string(),
                input_schema: json!({"type": "object"}),
            }]
        }
        async fn execute(
            &self,
            _tool_name: &str,
            _arguments: Value,
        ) -> Result<ToolResult, PalisadeError> {
            Err(PalisadeError::Internal("database on fire".to_string()))
        }
    }

    #[tokio::test]
    async fn test_plugin_failure_is_generic_to_client_detailed_in_audit() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(test_policy(dir.path())).unwrap();
        server.register_plugin(Arc::new(FailingPlugin)).unwrap();
        handshake(&mut server).await;

        let v = call_tool(&mut server, 30, "explode", json!({})).await;
        assert_eq!(v["result"]["isError"], true);
        let text = v["result"]["content"][0]["text"].as_str().unwrap();
        assert_eq!(text, "Tool 'explode' execution failed");
        assert!(!text.contains("database"), "engine detail must not leak");

        let records = audit_records(dir.path(), &server);
        let event = records
            .iter()
            .find(|r| r["kind"] == "security_event")
            .unwrap();
        assert_eq!(event["event_type"], "plugin_error");
        assert!(event["detail"]["detail"]
            .as_str()
            .unwrap()
            .contains("database on fire"));
    }

    // ---- Schema rejection ----

    #[tokio::test]
    async fn test_schema_rejection_is_tool_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        // echo requires "message"
        let v = call_tool(&mut server, 40, "echo", json!({})).await;
        assert_eq!(v["result"]["isError"], true);
        assert_eq!(v["result"]["content"][0]["text"], "Input validation failed");
    }

    #[tokio::test]
    async fn test_redaction_in_request_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let v = call_tool(
            &mut server,
            41,
            "echo",
            json!({"message": "q", "api_key": "sk-123"}),
        )
        .await;
        // Plugin received the real value; audit stored the redacted one
        assert_eq!(v["result"]["isError"], false);
        let records = audit_records(dir.path(), &server);
        assert_eq!(records[0]["arguments"]["api_key"], "***");
        assert_eq!(records[0]["arguments"]["message"], "q");
    }

    // ---- Notifications ----

    #[tokio::test]
    async fn test_unknown_notification_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let none = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/cancelled"}"#)
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_register_plugin_when_ready_yields_list_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        let notification = server.register_plugin(Arc::new(FailingPlugin)).unwrap();
        let v: Value = serde_json::from_str(&notification.unwrap()).unwrap();
        assert_eq!(v["method"], "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_register_plugin_before_ready_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(test_policy(dir.path())).unwrap();
        let notification = server
            .register_plugin(Arc::new(palisade_plugins::EchoPlugin))
            .unwrap();
        assert!(notification.is_none());
    }

    // ---- Shutdown ----

    #[tokio::test]
    async fn test_close_flushes_audit_and_blocks_further_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ready_server(dir.path()).await;
        call_tool(&mut server, 50, "echo", json!({"message": "x"})).await;
        server.close().await;

        let text = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 2);

        let raw = r#"{"jsonrpc":"2.0","id":51,"method":"tools/list","params":{}}"#;
        let v: Value = serde_json::from_str(&server.handle_message(raw).await.unwrap()).unwrap();
        assert_eq!(v["error"]["code"], jsonrpc::INVALID_REQUEST);
    }
}
