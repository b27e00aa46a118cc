// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound Guardrails
//!
//! Pre-flight checks that must pass before the gateway opens a connection to
//! the sandbox backend, plus the post-flight checks applied to whatever comes
//! back. Every function here is pure.
//!
//! # Security Guarantees
//! - Targets are matched exactly on `(host, port)`; no suffix, wildcard or
//!   subnet matching, so a rebinding name cannot slip through a pattern.
//! - Empty allow-lists deny everything.
//! - `..` segments are rejected on the raw path, before any normalization.
//! - Redirects are denied unless explicitly enabled.
//!
//! Denial reasons are for logs only. Callers translate a denial into a fixed
//! browser-safe message.

use reqwest::header::{HeaderMap, HeaderName, CONNECTION};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header carrying the gateway's own signature on outbound requests.
pub const INTERNAL_AUTH_HEADER: &str = "x-gateway-auth";
/// Header carrying the timestamp covered by [`INTERNAL_AUTH_HEADER`].
pub const INTERNAL_TIMESTAMP_HEADER: &str = "x-gateway-timestamp";

const INTERNAL_HEADER_PREFIX: &str = "x-gateway-";

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie", "host"];

/// An exact `(host, port)` pair the gateway may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Allow-list configuration for the proxy. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyGuardrailConfig {
    #[serde(default)]
    pub allowed_targets: Vec<TargetAddr>,

    #[serde(default)]
    pub allowed_path_prefixes: Vec<String>,

    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,

    #[serde(default)]
    pub allow_redirects: bool,
}

impl Default for ProxyGuardrailConfig {
    fn default() -> Self {
        Self {
            allowed_targets: Vec::new(),
            allowed_path_prefixes: Vec::new(),
            allowed_methods: default_allowed_methods(),
            max_response_bytes: default_max_response_bytes(),
            allow_redirects: false,
        }
    }
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_max_response_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Why a guardrail refused a request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    EmptyTargetAllowlist,
    TargetNotAllowed { host: String, port: u16 },
    EmptyPathAllowlist,
    PathNotAllowed(String),
    PathTraversal(String),
    InvalidPath(String),
    MethodNotAllowed(String),
    RedirectNotAllowed(u16),
    ResponseTooLarge { size: u64, limit: u64 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTargetAllowlist => write!(f, "No targets in allowlist"),
            Self::TargetNotAllowed { host, port } => {
                write!(f, "Target not in allowlist: {}:{}", host, port)
            }
            Self::EmptyPathAllowlist => write!(f, "No path prefixes in allowlist"),
            Self::PathNotAllowed(path) => write!(f, "Path not allowed: {}", path),
            Self::PathTraversal(path) => write!(f, "Path traversal attempt: {}", path),
            Self::InvalidPath(path) => write!(f, "Invalid path: {:?}", path),
            Self::MethodNotAllowed(method) => write!(f, "Method not allowed: {}", method),
            Self::RedirectNotAllowed(status) => write!(f, "Redirect response not allowed: {}", status),
            Self::ResponseTooLarge { size, limit } => {
                write!(f, "Response too large: {} bytes (limit {})", size, limit)
            }
        }
    }
}

impl std::error::Error for DenyReason {}

/// Outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Allowed,
    Denied(DenyReason),
}

impl GuardrailVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(reason) => Err(reason),
        }
    }
}

pub fn validate_target(host: &str, port: u16, cfg: &ProxyGuardrailConfig) -> GuardrailVerdict {
    if cfg.allowed_targets.is_empty() {
        return GuardrailVerdict::Denied(DenyReason::EmptyTargetAllowlist);
    }

    let allowed = cfg
        .allowed_targets
        .iter()
        .any(|t| t.port == port && t.host.eq_ignore_ascii_case(host));

    if allowed {
        GuardrailVerdict::Allowed
    } else {
        GuardrailVerdict::Denied(DenyReason::TargetNotAllowed {
            host: host.to_string(),
            port,
        })
    }
}

pub fn validate_path(path: &str, cfg: &ProxyGuardrailConfig) -> GuardrailVerdict {
    if cfg.allowed_path_prefixes.is_empty() {
        return GuardrailVerdict::Denied(DenyReason::EmptyPathAllowlist);
    }

    // Query strings travel as params, never inside the path.
    if !path.starts_with('/') || path.contains(['\0', '?', '#']) {
        return GuardrailVerdict::Denied(DenyReason::InvalidPath(path.to_string()));
    }

    // Raw segments only: a resolved path would already have lost the `..`.
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return GuardrailVerdict::Denied(DenyReason::PathTraversal(path.to_string()));
    }

    let lowered = path.to_ascii_lowercase();
    if ["%2e", "%2f", "%5c"].iter().any(|enc| lowered.contains(enc)) {
        return GuardrailVerdict::Denied(DenyReason::PathTraversal(path.to_string()));
    }

    if cfg
        .allowed_path_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
    {
        GuardrailVerdict::Allowed
    } else {
        GuardrailVerdict::Denied(DenyReason::PathNotAllowed(path.to_string()))
    }
}

pub fn validate_method(method: &str, cfg: &ProxyGuardrailConfig) -> GuardrailVerdict {
    if cfg
        .allowed_methods
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
    {
        GuardrailVerdict::Allowed
    } else {
        GuardrailVerdict::Denied(DenyReason::MethodNotAllowed(method.to_ascii_uppercase()))
    }
}

pub fn validate_response_status(status: u16, cfg: &ProxyGuardrailConfig) -> GuardrailVerdict {
    if (300..400).contains(&status) && !cfg.allow_redirects {
        GuardrailVerdict::Denied(DenyReason::RedirectNotAllowed(status))
    } else {
        GuardrailVerdict::Allowed
    }
}

/// Check a declared content length. Unknown lengths pass and must be
/// re-checked once the body has been read.
pub fn validate_response_size(content_length: Option<u64>, cfg: &ProxyGuardrailConfig) -> GuardrailVerdict {
    match content_length {
        Some(size) if size > cfg.max_response_bytes => {
            GuardrailVerdict::Denied(DenyReason::ResponseTooLarge {
                size,
                limit: cfg.max_response_bytes,
            })
        }
        _ => GuardrailVerdict::Allowed,
    }
}

/// Strip credentials, hop-by-hop headers and any caller-supplied internal
/// auth header. The proxy injects its own auth afterwards.
pub fn sanitize_request_headers(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed_headers(headers);
    let mut sanitized = HeaderMap::new();

    for (name, value) in headers.iter() {
        let lower = name.as_str();
        if CREDENTIAL_HEADERS.contains(&lower)
            || HOP_BY_HOP_HEADERS.contains(&lower)
            || lower.starts_with(INTERNAL_HEADER_PREFIX)
            || listed.contains(name)
        {
            continue;
        }
        sanitized.append(name.clone(), value.clone());
    }

    sanitized
}

/// Strip hop-by-hop headers and cookies before relaying a response.
pub fn sanitize_response_headers(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed_headers(headers);
    let mut sanitized = HeaderMap::new();

    for (name, value) in headers.iter() {
        let lower = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&lower)
            || lower == "set-cookie"
            || lower.starts_with(INTERNAL_HEADER_PREFIX)
            || listed.contains(name)
        {
            continue;
        }
        sanitized.append(name.clone(), value.clone());
    }

    sanitized
}

fn connection_listed_headers(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect()
}
