//! Sliding-window rate limiter for tool invocations.
//!
//! Tracks request timestamps per tool and enforces a policy-driven limit
//! within a sliding window. Bucket memory is bounded: entries older than
//! the window are pruned on every access, and every 100th check sweeps
//! buckets left empty after pruning.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use palisade_types::errors::RateLimitExceeded;

/// Default sliding-window size.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Every Nth check sweeps empty buckets.
const SWEEP_EVERY: u64 = 100;

struct Inner {
    buckets: HashMap<String, Vec<Instant>>,
    checks: u64,
}

/// Per-tool sliding-window rate limiter.
pub struct RateLimiter {
    window: Duration,
    inner: Mutex<Inner>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> RateLimiter {
        Self::with_window(WINDOW)
    }

    /// Construct with a custom window (tests use short windows).
    pub fn with_window(window: Duration) -> RateLimiter {
        assert!(!window.is_zero(), "window must be positive");
        RateLimiter {
            window,
            inner: Mutex::new(Inner {
                buckets: HashMap::new(),
                checks: 0,
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one invocation of `tool` under `limit` per window.
    ///
    /// Records the invocation when admitted.
    pub fn check(&self, tool: &str, limit: u32) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("rate limiter lock poisoned");

        inner.checks += 1;
        if inner.checks % SWEEP_EVERY == 0 {
            let window = self.window;
            inner.buckets.retain(|_, bucket| {
                bucket.retain(|t| now.duration_since(*t) < window);
                !bucket.is_empty()
            });
        }

        let window = self.window;
        let bucket = inner.buckets.entry(tool.to_string()).or_default();
        bucket.retain(|t| now.duration_since(*t) < window);

        if bucket.len() >= limit as usize {
            let retry_after_ms = bucket
                .iter()
                .min()
                .map(|oldest| {
                    window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_millis() as u64
                })
                .unwrap_or_else(|| window.as_millis() as u64);
            return Err(RateLimitExceeded {
                tool: tool.to_string(),
                limit,
                retry_after_ms,
            });
        }

        bucket.push(now);
        Ok(())
    }

    /// Current admitted count for a tool within the window.
    pub fn request_count(&self, tool: &str) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock().expect("rate limiter lock poisoned");
        inner
            .buckets
            .get(tool)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Reset one tool's bucket, or all buckets when `tool` is `None`.
    pub fn reset(&self, tool: Option<&str>) {
        let mut inner = self.inner.lock().expect("rate limiter lock poisoned");
        match tool {
            Some(tool) => {
                inner.buckets.remove(tool);
            }
            None => inner.buckets.clear(),
        }
    }

    /// Number of live buckets (for memory-bound assertions).
    pub fn bucket_count(&self) -> usize {
        self.inner
            .lock()
            .expect("rate limiter lock poisoned")
            .buckets
            .len()
    }
}
