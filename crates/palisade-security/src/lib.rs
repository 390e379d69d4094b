//! Security subsystem for the palisade MCP server.
//!
//! Every tool invocation flows through this crate, fail-closed:
//! - **Audit log** (`audit`): append-only JSON-lines trail with redaction
//! - **Firewall** (`firewall`): CIDR/endpoint/DNS egress control
//! - **Validator** (`validator`): schema validation plus path/command/URL
//!   sanitization
//! - **Rate limiter** (`ratelimiter`): per-tool sliding window
//! - **Engine** (`engine`): the facade composing all of the above

pub mod audit;
pub mod engine;
pub mod firewall;
pub mod ratelimiter;
pub mod validator;

pub use audit::{redact, AuditLog};
pub use engine::SecurityEngine;
pub use firewall::{BlockReason, Firewall, Resolver, SystemResolver};
pub use ratelimiter::RateLimiter;
pub use validator::{InputValidator, MAX_STRING_BYTES};
