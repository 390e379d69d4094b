//! Input validation and sanitization for tool arguments.
//!
//! Three fail-closed layers:
//! 1. a raw-message size ceiling of 1 MiB, enforced where messages are
//!    parsed before arguments reach this validator
//! 2. JSON Schema validation (Draft 2020-12) against the tool's declared
//!    input schema
//! 3. recursive sanitization of the argument tree, triggered by key name:
//!    `*path` keys are canonicalized and checked against filesystem globs,
//!    `command`/`cmd` keys against the command blocklist, `*url*` keys
//!    against the firewall, and every string leaf against a length ceiling
//!
//! The sanitizer returns a new argument tree; path fields are replaced by
//! their canonical absolute form so plugins receive the resolved value.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use palisade_types::policy::{FsDecision, SecurityPolicy};

use crate::firewall::{Firewall, UrlError};

/// Default ceiling for a single string field, in bytes. The raw-message
/// ceiling (1 MiB) is enforced where messages are parsed, before arguments
/// ever reach this validator.
pub const MAX_STRING_BYTES: usize = 8 * 1024;

/// A validation failure with the detailed reason.
///
/// The detail is for the audit log only; the server surfaces a generic
/// message to the client.
#[derive(Debug, Clone)]
pub enum ValidatorError {
    /// Schema validation failed at the given instance path.
    Schema(String),
    /// A path argument was denied (traversal, denied glob, outside roots).
    Path(String),
    /// A command argument was blocked by policy.
    Command(String),
    /// A URL argument was rejected by the firewall.
    Url { url: String, error: UrlError },
    /// A string field exceeded the length ceiling.
    Oversize { field: String, length: usize },
}

impl ValidatorError {
    /// Detailed reason, destined for the audit log.
    pub fn detail(&self) -> String {
        match self {
            ValidatorError::Schema(msg) => msg.clone(),
            ValidatorError::Path(msg) => msg.clone(),
            ValidatorError::Command(msg) => msg.clone(),
            ValidatorError::Url { url, error } => format!("url '{url}' rejected: {error}"),
            ValidatorError::Oversize { field, length } => {
                format!("field '{field}' length {length} exceeds {MAX_STRING_BYTES} bytes")
            }
        }
    }
}

impl std::fmt::Display for ValidatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.detail())
    }
}

impl std::error::Error for ValidatorError {}

fn is_path_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.ends_with("path") || lower == "project_path"
}

fn is_command_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("command") || key.eq_ignore_ascii_case("cmd")
}

fn is_url_key(key: &str) -> bool {
    key.to_ascii_lowercase().contains("url")
}

/// Validates and sanitizes tool inputs.
pub struct InputValidator {
    policy: Arc<SecurityPolicy>,
    firewall: Arc<Firewall>,
    max_string_bytes: usize,
}

impl InputValidator {
    pub fn new(policy: Arc<SecurityPolicy>, firewall: Arc<Firewall>) -> InputValidator {
        InputValidator {
            policy,
            firewall,
            max_string_bytes: MAX_STRING_BYTES,
        }
    }

    /// Validate arguments against the tool's schema, then sanitize.
    ///
    /// Returns a new, cleaned argument tree on success. Idempotent on
    /// accepted inputs: re-validating the cleaned tree yields it unchanged.
    pub async fn validate_tool_input(
        &self,
        tool: &str,
        schema: &Value,
        arguments: &Value,
    ) -> Result<Value, ValidatorError> {
        self.check_schema(tool, schema, arguments)?;

        // URL checks need the async firewall; the synchronous walk collects
        // them and they are verified afterwards (URLs are not rewritten).
        let mut urls: Vec<String> = Vec::new();
        let cleaned = self.sanitize(None, arguments, &mut urls)?;

        for url in urls {
            if let Err(error) = self.firewall.validate_url(&url).await {
                return Err(ValidatorError::Url { url, error });
            }
        }

        Ok(cleaned)
    }

    fn check_schema(&self, tool: &str, schema: &Value, arguments: &Value) -> Result<(), ValidatorError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .compile(schema)
            .map_err(|e| {
                ValidatorError::Schema(format!("invalid input schema for tool '{tool}': {e}"))
            })?;

        if let Err(mut errors) = compiled.validate(arguments) {
            if let Some(first) = errors.next() {
                let pointer = first.instance_path.to_string();
                let at = if pointer.is_empty() {
                    "root"
                } else {
                    pointer.as_str()
                };
                return Err(ValidatorError::Schema(format!(
                    "schema validation failed at '{at}': {first}"
                )));
            }
        }
        Ok(())
    }

    /// Structural recursion over the argument tree, producing a new tree.
    fn sanitize(
        &self,
        key: Option<&str>,
        value: &Value,
        urls: &mut Vec<String>,
    ) -> Result<Value, ValidatorError> {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.sanitize(Some(k), v, urls)?);
                }
                Ok(Value::Object(out))
            }
            // Array elements inherit the array's key, so a list under a
            // `path` key is sanitized element by element.
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.sanitize(key, item, urls)?);
                }
                Ok(Value::Array(out))
            }
            Value::String(s) => self.sanitize_string(key, s, urls).map(Value::String),
            other => Ok(other.clone()),
        }
    }

    fn sanitize_string(
        &self,
        key: Option<&str>,
        s: &str,
        urls: &mut Vec<String>,
    ) -> Result<String, ValidatorError> {
        let field = key.unwrap_or("<value>");
        if s.len() > self.max_string_bytes {
            return Err(ValidatorError::Oversize {
                field: field.to_string(),
                length: s.len(),
            });
        }

        let Some(key) = key else {
            return Ok(s.to_string());
        };

        if is_path_key(key) {
            return self.sanitize_path(s);
        }
        if is_command_key(key) {
            if self.policy.is_command_blocked(s) {
                return Err(ValidatorError::Command(format!(
                    "command blocked by policy: {s}"
                )));
            }
            return Ok(s.to_string());
        }
        if is_url_key(key) {
            urls.push(s.to_string());
        }
        Ok(s.to_string())
    }

    /// Canonicalize a path argument and check it against the filesystem
    /// policy. The cleaned tree carries the canonical absolute form.
    fn sanitize_path(&self, raw: &str) -> Result<String, ValidatorError> {
        let resolved = resolve_path(raw).map_err(ValidatorError::Path)?;
        match self.policy.match_fs(&resolved) {
            FsDecision::Allowed => Ok(resolved.to_string_lossy().into_owned()),
            FsDecision::Denied => Err(ValidatorError::Path(format!(
                "path denied by policy: {}",
                resolved.display()
            ))),
            FsDecision::Outside => Err(ValidatorError::Path(format!(
                "path outside allowed directories: {}",
                resolved.display()
            ))),
        }
    }
}

/// Resolve a path to absolute, symlink-free canonical form.
///
/// The deepest existing ancestor is canonicalized through the OS (resolving
/// symlinks and `..`); the non-existent remainder is normalized lexically.
/// A `..` in the remainder pops into the canonical prefix, so traversal can
/// never survive resolution.
pub fn resolve_path(raw: &str) -> Result<PathBuf, String> {
    if raw.is_empty() {
        return Err("empty path".to_string());
    }
    if raw.contains('\0') {
        return Err("path contains null bytes".to_string());
    }

    let expanded = expand_home(raw);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map_err(|e| format!("cannot resolve relative path: {e}"))?
            .join(expanded)
    };

    // Split into the deepest existing ancestor and the trailing components.
    let mut existing = absolute.clone();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while std::fs::symlink_metadata(&existing).is_err() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = std::fs::canonicalize(&existing)
        .map_err(|e| format!("cannot canonicalize {}: {e}", existing.display()))?;

    for name in tail.iter().rev() {
        match Path::new(name).components().next() {
            Some(Component::ParentDir) => {
                resolved.pop();
            }
            Some(Component::CurDir) | None => {}
            _ => resolved.push(name),
        }
    }

    Ok(resolved)
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = raw.strip_prefix('~').unwrap_or("").trim_start_matches('/');
            return if rest.is_empty() {
                PathBuf::from(home)
            } else {
                Path::new(&home).join(rest)
            };
        }
    }
    PathBuf::from(raw)
}
