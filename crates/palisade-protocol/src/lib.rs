//! Protocol surface for the palisade MCP server.
//!
//! - **JSON-RPC codec** (`jsonrpc`): parsing, formatting, canonical codes,
//!   message size cap
//! - **Transport** (`transport`): newline-delimited stdio with stderr-only
//!   diagnostics
//! - **Lifecycle** (`lifecycle`): the initialize/initialized handshake
//!   state machine and version negotiation

pub mod jsonrpc;
pub mod lifecycle;
pub mod transport;

pub use jsonrpc::{Incoming, Notification, Request, RequestId, RpcError};
pub use lifecycle::{Lifecycle, LifecycleState, PROTOCOL_VERSION};
pub use transport::{StdioTransport, Transport};
