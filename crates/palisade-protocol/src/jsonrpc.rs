//! JSON-RPC 2.0 message parsing and formatting.
//!
//! One line of input becomes a [`Request`], a [`Notification`], or an
//! [`RpcError`] with one of the canonical codes. A raw-size ceiling is
//! enforced before parsing; a message of exactly the ceiling is accepted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Maximum raw message size in bytes (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// A request id: string or integer. `null` ids appear only in outgoing
/// error responses when the offending id is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

/// A JSON-RPC request (carries an id and expects a response).
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Map<String, Value>,
}

/// A JSON-RPC notification (no id, no response).
#[derive(Debug, Clone)]
pub struct Notification {
    pub method: String,
    pub params: Map<String, Value>,
}

/// A parsed incoming message.
#[derive(Debug, Clone)]
pub enum Incoming {
    Request(Request),
    Notification(Notification),
}

/// A protocol-level error carrying a canonical JSON-RPC code.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> RpcError {
        RpcError {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

/// Parse one raw message line.
pub fn parse_message(raw: &str) -> Result<Incoming, RpcError> {
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(RpcError::new(
            INVALID_REQUEST,
            format!(
                "message too large: {} bytes exceeds {MAX_MESSAGE_SIZE} limit",
                raw.len()
            ),
        ));
    }

    let data: Value = serde_json::from_str(raw)
        .map_err(|e| RpcError::new(PARSE_ERROR, format!("parse error: {e}")))?;

    let Value::Object(obj) = data else {
        return Err(RpcError::new(
            INVALID_REQUEST,
            "invalid request: message must be an object",
        ));
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(RpcError::new(
            INVALID_REQUEST,
            "invalid request: jsonrpc must be \"2.0\"",
        ));
    }

    let method = match obj.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => {
            return Err(RpcError::new(
                INVALID_REQUEST,
                "invalid request: method must be a non-empty string",
            ));
        }
    };

    let params = match obj.get("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(RpcError::new(
                INVALID_REQUEST,
                "invalid request: params must be an object",
            ));
        }
    };

    match obj.get("id") {
        None => Ok(Incoming::Notification(Notification { method, params })),
        Some(Value::Number(n)) if n.as_i64().is_some() => Ok(Incoming::Request(Request {
            id: RequestId::Number(n.as_i64().unwrap_or_default()),
            method,
            params,
        })),
        Some(Value::String(s)) => Ok(Incoming::Request(Request {
            id: RequestId::String(s.clone()),
            method,
            params,
        })),
        Some(_) => Err(RpcError::new(
            INVALID_REQUEST,
            "invalid request: id must be a string or integer",
        )),
    }
}

/// Format a successful response.
pub fn format_response(id: &RequestId, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
    .to_string()
}

/// Format an error response. `id` is `None` when the offending id is
/// unknown (parse failures, oversize), which serializes as `null`.
pub fn format_error(id: Option<&RequestId>, error: &RpcError) -> String {
    let mut err_obj = json!({
        "code": error.code,
        "message": error.message,
    });
    if let Some(data) = &error.data {
        err_obj["data"] = data.clone();
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": err_obj,
    })
    .to_string()
}

/// Format a server-emitted notification.
pub fn format_notification(method: &str, params: Option<Value>) -> String {
    let mut msg = json!({
        "jsonrpc": "2.0",
        "method": method,
    });
    if let Some(params) = params {
        msg["params"] = params;
    }
    msg.to_string()
}
