//! Network firewall.
//!
//! Fail-closed validation of every network destination a tool names:
//! - ports against the policy blocklist
//! - IP literals against the trusted CIDR set
//! - hostnames against the endpoint allowlist and the DNS allowlist
//! - URLs by scheme/host/port extraction
//!
//! Hostname resolution is cached with a TTL and a bounded entry count;
//! eviction is oldest-first.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use palisade_types::policy::SecurityPolicy;

/// How long a cached resolution stays valid.
pub const DNS_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cache capacity; the oldest entry is evicted when full.
pub const DNS_CACHE_MAX_ENTRIES: usize = 1024;

/// Why the firewall rejected a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    BlockedPort,
    NotInAllowedRange,
    DnsNotAllowed,
    DnsResolutionFailed,
    EndpointNotAllowed,
}

impl BlockReason {
    /// Snake-case identifier used in audit event detail.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::BlockedPort => "blocked_port",
            BlockReason::NotInAllowedRange => "not_in_allowed_range",
            BlockReason::DnsNotAllowed => "dns_not_allowed",
            BlockReason::DnsResolutionFailed => "dns_resolution_failed",
            BlockReason::EndpointNotAllowed => "endpoint_not_allowed",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL validation failure: either the URL never parsed, or its destination
/// was blocked.
#[derive(Debug, Clone)]
pub enum UrlError {
    Malformed(String),
    Blocked {
        host: String,
        port: u16,
        reason: BlockReason,
    },
}

impl UrlError {
    /// Audit detail for this failure.
    pub fn detail(&self, url: &str) -> serde_json::Value {
        match self {
            UrlError::Malformed(msg) => json!({"url": url, "reason": "malformed", "message": msg}),
            UrlError::Blocked { host, port, reason } => {
                json!({"url": url, "host": host, "port": port, "reason": reason.as_str()})
            }
        }
    }
}

impl std::fmt::Display for UrlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlError::Malformed(msg) => write!(f, "malformed URL: {msg}"),
            UrlError::Blocked { host, port, reason } => {
                write!(f, "access denied to {host}:{port}: {reason}")
            }
        }
    }
}

/// Hostname resolution seam, replaceable in tests.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system.
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0u16)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

struct CacheEntry {
    ip: IpAddr,
    inserted_at: Instant,
}

/// Policy-driven network firewall with cached DNS resolution.
pub struct Firewall {
    policy: Arc<SecurityPolicy>,
    resolver: Box<dyn Resolver>,
    dns_cache: Mutex<HashMap<String, CacheEntry>>,
}

impl Firewall {
    pub fn new(policy: Arc<SecurityPolicy>) -> Firewall {
        Self::with_resolver(policy, Box::new(SystemResolver))
    }

    /// Construct with a custom resolver (tests inject a fake here).
    pub fn with_resolver(policy: Arc<SecurityPolicy>, resolver: Box<dyn Resolver>) -> Firewall {
        Firewall {
            policy,
            resolver,
            dns_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Validate a `host:port` destination.
    ///
    /// Decision order:
    /// 1. blocked port (applies even to trusted ranges)
    /// 2. IP literal → trusted CIDR membership
    /// 3. hostname in the endpoint allowlist → allowed without resolution
    /// 4. hostname in the DNS allowlist → resolve (cached), then CIDR check
    /// 5. reject
    pub async fn validate_address(&self, host: &str, port: u16) -> Result<(), BlockReason> {
        if self.policy.is_port_blocked(port) {
            return Err(BlockReason::BlockedPort);
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            return if self.policy.is_ip_allowed(ip) {
                Ok(())
            } else {
                Err(BlockReason::NotInAllowedRange)
            };
        }

        if self.policy.is_endpoint_allowed(host, port) {
            return Ok(());
        }

        if self.policy.is_dns_allowed(host) {
            let ip = self.resolve_cached(host).await?;
            return if self.policy.is_ip_allowed(ip) {
                Ok(())
            } else {
                Err(BlockReason::NotInAllowedRange)
            };
        }

        if self.policy.network.allow_dns {
            Err(BlockReason::DnsNotAllowed)
        } else {
            Err(BlockReason::EndpointNotAllowed)
        }
    }

    /// Validate a URL: parse, extract host and port (scheme default), and
    /// delegate to [`Firewall::validate_address`].
    pub async fn validate_url(&self, raw: &str) -> Result<(), UrlError> {
        let parsed =
            url::Url::parse(raw).map_err(|e| UrlError::Malformed(e.to_string()))?;

        let scheme = parsed.scheme();
        let default_port = match scheme {
            "http" => 80,
            "https" => 443,
            other => {
                return Err(UrlError::Malformed(format!("unsupported scheme: {other}")));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| UrlError::Malformed("URL has no host".to_string()))?
            // `Url` brackets IPv6 hosts; strip for IpAddr parsing
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed.port().unwrap_or(default_port);

        self.validate_address(&host, port)
            .await
            .map_err(|reason| UrlError::Blocked { host, port, reason })
    }

    /// Resolve a hostname through the TTL- and capacity-bounded cache.
    async fn resolve_cached(&self, host: &str) -> Result<IpAddr, BlockReason> {
        let mut cache = self.dns_cache.lock().await;

        if let Some(entry) = cache.get(host) {
            if entry.inserted_at.elapsed() < DNS_CACHE_TTL {
                return Ok(entry.ip);
            }
            cache.remove(host);
        }

        let addrs = self
            .resolver
            .resolve(host)
            .await
            .map_err(|_| BlockReason::DnsResolutionFailed)?;
        let ip = *addrs.first().ok_or(BlockReason::DnsResolutionFailed)?;

        if cache.len() >= DNS_CACHE_MAX_ENTRIES {
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        debug!(host = %host, ip = %ip, "cached DNS resolution");
        cache.insert(
            host.to_string(),
            CacheEntry {
                ip,
                inserted_at: Instant::now(),
            },
        );
        Ok(ip)
    }

    /// Number of live cache entries.
    pub async fn dns_cache_len(&self) -> usize {
        self.dns_cache.lock().await.len()
    }

    #[cfg(test)]
    async fn backdate_cache_entry(&self, host: &str, age: Duration) {
        let mut cache = self.dns_cache.lock().await;
        if let Some(entry) = cache.get_mut(host) {
            entry.inserted_at = Instant::now() - age;
        }
    }
}
