//! Append-only audit logger.
//!
//! One JSON object per line, UTF-8, newline-terminated. Arguments are
//! deep-copied and redacted before they reach the log; the un-redacted
//! values continue to the plugin untouched. Writes are buffered and flushed
//! after a record-count or time threshold, and again on close.
//!
//! A write failure after a successful open never crashes the server: the
//! record is dropped, the gap is counted, and the count is reported at
//! shutdown.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

use palisade_types::errors::PalisadeError;

/// Flush after this many buffered records.
const FLUSH_EVERY_RECORDS: usize = 50;

/// Flush when this much time has passed since the last flush.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Object keys whose values are redacted, matched case-insensitively as
/// substrings of the key name.
const SENSITIVE_KEY_PATTERN: &str =
    r"(?i)password|token|secret|api[_-]?key|authorization|private[_-]?key";

fn sensitive_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SENSITIVE_KEY_PATTERN).expect("sensitive key pattern is valid"))
}

/// Redact sensitive values in a JSON tree.
///
/// Pure: returns a new value, never mutates the input. Any object key
/// matching the sensitive pattern has its value replaced by `"***"`,
/// whatever its type. Idempotent by construction.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if sensitive_key_regex().is_match(key) {
                    out.insert(key.clone(), Value::String("***".to_string()));
                } else {
                    out.insert(key.clone(), redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug)]
struct Inner {
    writer: BufWriter<File>,
    unflushed: usize,
    last_flush: Instant,
    dropped: u64,
}

impl Inner {
    fn write_record(&mut self, record: &Value) {
        let mut line = record.to_string();
        line.push('\n');
        match self.writer.write_all(line.as_bytes()) {
            Ok(()) => {
                self.unflushed += 1;
                if self.unflushed >= FLUSH_EVERY_RECORDS
                    || self.last_flush.elapsed() >= FLUSH_INTERVAL
                {
                    self.flush();
                }
            }
            Err(e) => {
                self.dropped += 1;
                warn!(error = %e, dropped = self.dropped, "audit record dropped");
            }
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "audit flush failed");
        }
        self.unflushed = 0;
        self.last_flush = Instant::now();
    }
}

/// Append-only JSON-lines audit log.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    include: Vec<String>,
    inner: Mutex<Inner>,
}

impl AuditLog {
    /// Open the log file in append mode, creating parent directories.
    ///
    /// Open failure is a configuration error and is fatal to the server.
    pub fn open(path: &Path) -> Result<AuditLog, PalisadeError> {
        Self::open_with_include(path, Vec::new())
    }

    /// Open with an include filter; record kinds not listed are skipped.
    /// An empty filter includes everything.
    pub fn open_with_include(path: &Path, include: Vec<String>) -> Result<AuditLog, PalisadeError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PalisadeError::Audit(format!(
                        "cannot create audit log directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                PalisadeError::Audit(format!("cannot open audit log {}: {e}", path.display()))
            })?;
        Ok(AuditLog {
            path: path.to_path_buf(),
            include,
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                unflushed: 0,
                last_flush: Instant::now(),
                dropped: 0,
            }),
        })
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, kind: &str, record: Value) {
        if !self.include.is_empty() && !self.include.iter().any(|k| k == kind) {
            return;
        }
        let mut inner = self.inner.lock().expect("audit lock poisoned");
        inner.write_record(&record);
    }

    /// Log an incoming tool request. Arguments are deep-copied and redacted.
    pub fn log_request(&self, request_id: &str, tool: &str, arguments: &Value) {
        self.record(
            "request",
            json!({
                "ts": timestamp(),
                "kind": "request",
                "request_id": request_id,
                "tool": tool,
                "arguments": redact(arguments),
            }),
        );
    }

    /// Log a tool response with its outcome and duration.
    pub fn log_response(&self, request_id: &str, status: &str, duration_ms: u64) {
        self.record(
            "response",
            json!({
                "ts": timestamp(),
                "kind": "response",
                "request_id": request_id,
                "status": status,
                "duration_ms": duration_ms,
            }),
        );
    }

    /// Log a security event (blocked network access, validation failure, ...).
    pub fn log_security_event(&self, event_type: &str, detail: Value) {
        self.record(
            "security_event",
            json!({
                "ts": timestamp(),
                "kind": "security_event",
                "event_type": event_type,
                "detail": detail,
            }),
        );
    }

    /// Number of records dropped due to write errors since open.
    pub fn dropped_records(&self) -> u64 {
        self.inner.lock().expect("audit lock poisoned").dropped
    }

    /// Flush buffered records and report the dropped-record count.
    pub fn close(&self) -> u64 {
        let mut inner = self.inner.lock().expect("audit lock poisoned");
        inner.flush();
        if inner.dropped > 0 {
            warn!(
                dropped = inner.dropped,
                path = %self.path.display(),
                "audit log closed with dropped records"
            );
        }
        inner.dropped
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.flush();
        }
    }
}
