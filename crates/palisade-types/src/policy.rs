//! Security policy model.
//!
//! The policy is loaded once from a YAML file at startup and is immutable
//! afterwards. Every security decision in the server (network egress,
//! filesystem access, command blocking, rate limits) is answered by a pure
//! query on this type.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::PalisadeError;

/// Default rate limit (requests per minute) when neither the tool nor
/// `default` appears in `tools.rate_limits`.
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Default tool execution timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Shell metacharacters that are rejected in command strings regardless of
/// whether the base command is on the blocklist.
const SHELL_METACHARACTERS: &[char] = &['|', '&', ';', '>', '<', '`'];

// ============================================================
// Raw YAML shapes
// ============================================================

/// An explicitly allowed external endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Literal hostname; matching is exact and case-insensitive.
    pub host: String,
    /// Ports allowed for this host.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Human-readable note for policy reviewers.
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Trusted CIDR ranges (e.g. `127.0.0.1/32`, `10.0.0.0/8`).
    #[serde(default)]
    pub allowed_ranges: Vec<String>,
    /// Explicitly allowed external endpoints.
    #[serde(default)]
    pub allowed_endpoints: Vec<Endpoint>,
    /// Ports rejected even for trusted ranges.
    #[serde(default)]
    pub blocked_ports: Vec<u16>,
    /// Whether hostname resolution is permitted at all.
    #[serde(default)]
    pub allow_dns: bool,
    /// Hostnames that may be resolved when `allow_dns` is set.
    #[serde(default)]
    pub dns_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemPolicy {
    /// Glob patterns for paths tools may touch.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Glob patterns for paths that are always denied. Denied dominates.
    #[serde(default)]
    pub denied_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsPolicy {
    /// Command basenames that must never run.
    #[serde(default)]
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsPolicy {
    /// Per-call execution timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Requests-per-minute limits keyed by tool name; the `default` key
    /// applies to tools not listed.
    #[serde(default)]
    pub rate_limits: HashMap<String, u32>,
}

impl Default for ToolsPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            rate_limits: HashMap::new(),
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditPolicy {
    /// Audit log destination; audit is disabled when unset.
    #[serde(default)]
    pub log_file: Option<String>,
    /// Minimum level recorded.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Record kinds to include; empty means all.
    #[serde(default)]
    pub include: Vec<String>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Serde target for the policy YAML document before compilation.
#[derive(Debug, Clone, Deserialize)]
struct PolicyFile {
    version: String,
    #[serde(default)]
    network: NetworkPolicy,
    #[serde(default)]
    filesystem: FilesystemPolicy,
    #[serde(default)]
    commands: CommandsPolicy,
    #[serde(default)]
    tools: ToolsPolicy,
    #[serde(default)]
    audit: AuditPolicy,
}

// ============================================================
// Compiled policy
// ============================================================

/// Outcome of matching a resolved absolute path against the filesystem
/// policy. Denied dominates allowed; a path matching neither is `Outside`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsDecision {
    Allowed,
    Denied,
    Outside,
}

/// Immutable, compiled security policy.
///
/// Construction validates the document, expands `${NAME}` environment
/// references in path-typed strings, parses CIDR ranges, and compiles the
/// filesystem glob sets, so every query afterwards is cheap and infallible.
#[derive(Debug)]
pub struct SecurityPolicy {
    pub version: String,
    pub network: NetworkPolicy,
    pub filesystem: FilesystemPolicy,
    pub commands: CommandsPolicy,
    pub tools: ToolsPolicy,
    pub audit: AuditPolicy,

    allowed_networks: Vec<IpNet>,
    allowed_globs: GlobSet,
    denied_globs: GlobSet,
}

impl SecurityPolicy {
    /// Load and compile a policy from a YAML file.
    pub fn load(path: &Path) -> Result<SecurityPolicy, PalisadeError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PalisadeError::Policy(format!("policy file not readable: {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Compile a policy from YAML text.
    pub fn from_yaml(text: &str) -> Result<SecurityPolicy, PalisadeError> {
        let file: PolicyFile = serde_yaml::from_str(text)
            .map_err(|e| PalisadeError::Policy(format!("policy YAML malformed: {e}")))?;
        Self::compile(file)
    }

    fn compile(mut file: PolicyFile) -> Result<SecurityPolicy, PalisadeError> {
        if file.version.trim().is_empty() {
            return Err(PalisadeError::Policy(
                "policy must include a non-empty 'version' field".to_string(),
            ));
        }

        // Environment expansion applies to path-typed strings only.
        for p in file
            .filesystem
            .allowed_paths
            .iter_mut()
            .chain(file.filesystem.denied_paths.iter_mut())
        {
            *p = expand_env_vars(p);
        }
        if let Some(log_file) = file.audit.log_file.as_mut() {
            *log_file = expand_env_vars(log_file);
        }

        // `default` is always defined so rate_limit() never guesses.
        file.tools
            .rate_limits
            .entry("default".to_string())
            .or_insert(DEFAULT_RATE_LIMIT);

        let allowed_networks = parse_networks(&file.network.allowed_ranges);
        let allowed_globs = compile_globs(&file.filesystem.allowed_paths, "allowed_paths")?;
        let denied_globs = compile_globs(&file.filesystem.denied_paths, "denied_paths")?;

        Ok(SecurityPolicy {
            version: file.version,
            network: file.network,
            filesystem: file.filesystem,
            commands: file.commands,
            tools: file.tools,
            audit: file.audit,
            allowed_networks,
            allowed_globs,
            denied_globs,
        })
    }

    /// Requests-per-minute limit for a tool, falling back to `default`.
    pub fn rate_limit(&self, tool: &str) -> u32 {
        self.tools
            .rate_limits
            .get(tool)
            .or_else(|| self.tools.rate_limits.get("default"))
            .copied()
            .unwrap_or(DEFAULT_RATE_LIMIT)
    }

    /// Per-call tool execution timeout.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tools.timeout)
    }

    pub fn is_port_blocked(&self, port: u16) -> bool {
        self.network.blocked_ports.contains(&port)
    }

    /// Exact, case-insensitive host match plus port membership.
    pub fn is_endpoint_allowed(&self, host: &str, port: u16) -> bool {
        self.network
            .allowed_endpoints
            .iter()
            .any(|e| e.host.eq_ignore_ascii_case(host) && e.ports.contains(&port))
    }

    pub fn is_dns_allowed(&self, host: &str) -> bool {
        self.network.allow_dns
            && self
                .network
                .dns_allowlist
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn is_ip_allowed(&self, ip: IpAddr) -> bool {
        self.allowed_networks.iter().any(|net| net.contains(&ip))
    }

    /// Whether a command string is blocked by policy.
    ///
    /// The basename of the first whitespace-separated token is compared to
    /// the blocklist. Shell metacharacters (`| & ; > <` and backticks)
    /// anywhere in the string are rejected unconditionally.
    pub fn is_command_blocked(&self, command: &str) -> bool {
        if command.contains(SHELL_METACHARACTERS) {
            return true;
        }
        let Some(first) = command.split_whitespace().next() else {
            return false;
        };
        let base = Path::new(first)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| first.to_string());
        self.commands.blocked.iter().any(|b| b.as_str() == base)
    }

    /// Match a resolved absolute path against the filesystem globs.
    pub fn match_fs(&self, path: &Path) -> FsDecision {
        if self.denied_globs.is_match(path) {
            return FsDecision::Denied;
        }
        if self.allowed_globs.is_match(path) {
            return FsDecision::Allowed;
        }
        FsDecision::Outside
    }
}

// ============================================================
// Helpers
// ============================================================

/// Expand `${NAME}` environment references in a string.
///
/// Unknown variables are left unchanged; `${HOME}` falls back to the
/// process owner's home directory when the variable is unset.
pub fn expand_env_vars(value: &str) -> String {
    // Compiled per call; policy loading happens once at startup.
    let pattern = Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid");
    pattern
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(v) => v,
                Err(_) if name == "HOME" => std::env::var("USERPROFILE")
                    .unwrap_or_else(|_| caps[0].to_string()),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn parse_networks(ranges: &[String]) -> Vec<IpNet> {
    let mut networks = Vec::with_capacity(ranges.len());
    for range in ranges {
        let parsed = range
            .parse::<IpNet>()
            .or_else(|_| range.parse::<IpAddr>().map(IpNet::from));
        match parsed {
            Ok(net) => networks.push(net),
            Err(_) => warn!(range = %range, "skipping unparseable CIDR range in policy"),
        }
    }
    networks
}

fn compile_globs(patterns: &[String], section: &str) -> Result<GlobSet, PalisadeError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            PalisadeError::Policy(format!("invalid glob in filesystem.{section}: '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PalisadeError::Policy(format!("failed to compile filesystem.{section}: {e}")))
}

// ============================================================
// Tests
// ============================================================
