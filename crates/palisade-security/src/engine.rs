//! Integrated security engine.
//!
//! Facade composing the policy, firewall, validator, rate limiter, and
//! audit log into a single enforcement surface. The server calls the
//! engine; the engine calls the components and records every rejection as
//! a security event.
//!
//! Scoped acquisition: `open` acquires the audit log, `close` flushes and
//! releases it. The owning server guarantees `close` runs on every exit
//! path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use palisade_types::errors::{PalisadeError, RateLimitExceeded};
use palisade_types::policy::SecurityPolicy;

use crate::audit::AuditLog;
use crate::firewall::{Firewall, UrlError};
use crate::ratelimiter::RateLimiter;
use crate::validator::{InputValidator, ValidatorError};

/// Unified security engine.
///
/// Components are composed, not inherited; each is independently testable
/// and the engine only adds audit wiring around their decisions.
pub struct SecurityEngine {
    policy: Arc<SecurityPolicy>,
    firewall: Arc<Firewall>,
    validator: InputValidator,
    rate_limiter: RateLimiter,
    audit: Option<AuditLog>,
}

impl SecurityEngine {
    /// Open the engine for a policy, acquiring the audit log when one is
    /// configured. Audit open failure is fatal.
    pub fn open(policy: Arc<SecurityPolicy>) -> Result<SecurityEngine, PalisadeError> {
        let firewall = Arc::new(Firewall::new(Arc::clone(&policy)));
        Self::with_firewall(policy, firewall)
    }

    /// Open with a pre-built firewall (tests inject fake resolvers here).
    pub fn with_firewall(
        policy: Arc<SecurityPolicy>,
        firewall: Arc<Firewall>,
    ) -> Result<SecurityEngine, PalisadeError> {
        let audit = match policy.audit.log_file.as_deref() {
            Some(path) if !path.is_empty() => Some(AuditLog::open_with_include(
                std::path::Path::new(path),
                policy.audit.include.clone(),
            )?),
            _ => None,
        };
        let validator = InputValidator::new(Arc::clone(&policy), Arc::clone(&firewall));
        Ok(SecurityEngine {
            policy,
            firewall,
            validator,
            rate_limiter: RateLimiter::new(),
            audit,
        })
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn firewall(&self) -> &Arc<Firewall> {
        &self.firewall
    }

    /// Per-call tool execution timeout from policy.
    pub fn timeout(&self) -> Duration {
        self.policy.timeout()
    }

    /// Validate and sanitize tool input.
    ///
    /// On rejection the detailed reason is recorded as a security event
    /// (`validation_failed`, or `network_blocked` for URL rejections) and a
    /// validation error is returned; the caller surfaces a generic message.
    pub async fn check_input(
        &self,
        tool: &str,
        schema: &Value,
        arguments: &Value,
    ) -> Result<Value, PalisadeError> {
        match self.validator.validate_tool_input(tool, schema, arguments).await {
            Ok(cleaned) => Ok(cleaned),
            Err(ValidatorError::Url { url, error }) => {
                match &error {
                    UrlError::Blocked { .. } => {
                        self.on_security_event("network_blocked", error.detail(&url));
                    }
                    UrlError::Malformed(_) => {
                        self.on_security_event(
                            "validation_failed",
                            json!({"tool": tool, "reason": error.detail(&url)}),
                        );
                    }
                }
                Err(PalisadeError::Validation(format!("url '{url}' rejected: {error}")))
            }
            Err(err) => {
                self.on_security_event(
                    "validation_failed",
                    json!({"tool": tool, "reason": err.detail()}),
                );
                Err(PalisadeError::Validation(err.detail()))
            }
        }
    }

    /// Check the tool against its policy rate limit, recording a
    /// `rate_limit_exceeded` event on rejection.
    pub fn check_rate(&self, tool: &str) -> Result<(), RateLimitExceeded> {
        let limit = self.policy.rate_limit(tool);
        self.rate_limiter.check(tool, limit).map_err(|err| {
            self.on_security_event(
                "rate_limit_exceeded",
                json!({
                    "tool": tool,
                    "limit": limit,
                    "window_seconds": self.rate_limiter.window().as_secs(),
                    "retry_after_ms": err.retry_after_ms,
                }),
            );
            err
        })
    }

    /// Validate a network address, recording `network_blocked` on rejection.
    pub async fn validate_address(&self, host: &str, port: u16) -> Result<(), PalisadeError> {
        self.firewall.validate_address(host, port).await.map_err(|reason| {
            self.on_security_event(
                "network_blocked",
                json!({"host": host, "port": port, "reason": reason.as_str()}),
            );
            PalisadeError::NetworkBlocked(format!("{host}:{port}: {reason}"))
        })
    }

    /// Validate a URL, recording `network_blocked` on rejection.
    pub async fn validate_url(&self, url: &str) -> Result<(), PalisadeError> {
        self.firewall.validate_url(url).await.map_err(|error| {
            self.on_security_event("network_blocked", error.detail(url));
            match &error {
                UrlError::Malformed(msg) => PalisadeError::MalformedUrl(msg.clone()),
                UrlError::Blocked { reason, .. } => {
                    PalisadeError::NetworkBlocked(format!("{url}: {reason}"))
                }
            }
        })
    }

    /// Record a tool request in the audit log (arguments are redacted there).
    pub fn on_request(&self, request_id: &str, tool: &str, arguments: &Value) {
        if let Some(audit) = &self.audit {
            audit.log_request(request_id, tool, arguments);
        }
    }

    /// Record a tool response outcome.
    pub fn on_response(&self, request_id: &str, status: &str, duration_ms: u64) {
        if let Some(audit) = &self.audit {
            audit.log_response(request_id, status, duration_ms);
        }
    }

    /// Record a security event.
    pub fn on_security_event(&self, event_type: &str, detail: Value) {
        debug!(event_type = %event_type, "security event");
        if let Some(audit) = &self.audit {
            audit.log_security_event(event_type, detail);
        }
    }

    /// Generate a request id for audit correlation when the caller has none.
    pub fn next_request_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Flush the audit log and report dropped records.
    pub fn close(&self) -> u64 {
        self.audit.as_ref().map(|a| a.close()).unwrap_or(0)
    }
}
