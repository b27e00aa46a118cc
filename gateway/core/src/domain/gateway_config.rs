// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Gateway Configuration Types
//
// Defines the configuration schema for the workspace gateway:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Upstream target, timeouts and retry policy
// - Guardrail allow-lists
// - Capability and session token settings (secrets via "env:VAR" or "file:PATH")
// - Rate limits, session limits, WebSocket queue and supervisor tick settings
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::circuit_breaker::CircuitBreakerConfig;
use crate::domain::exec_session::{ExecPolicy, ExecTemplate};
use crate::domain::guardrail::{ProxyGuardrailConfig, TargetAddr};
use crate::domain::lifecycle::SessionLimitConfig;
use crate::domain::rate_limit::{RateLimitConfig, WindowLimit};

pub const API_VERSION: &str = "gateway.dev/v1";
pub const KIND: &str = "GatewayConfig";
pub const CONFIG_PATH_ENV: &str = "WSGW_CONFIG_PATH";

/// A resolved secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Resolve a secret reference: `env:VAR`, `file:PATH`, or a literal value.
pub fn resolve_secret(reference: &str) -> anyhow::Result<SecretString> {
    if let Some(var_name) = reference.strip_prefix("env:") {
        let value = std::env::var(var_name)
            .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name))?;
        return Ok(SecretString(value));
    }
    if let Some(path) = reference.strip_prefix("file:") {
        let value = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read secret file {}: {}", path, e))?;
        return Ok(SecretString(value.trim_end().to_string()));
    }
    Ok(SecretString(reference.to_string()))
}

/// Top-level Kubernetes-style gateway configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// API version (must be "gateway.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "GatewayConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: GatewayConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default = "default_guardrails")]
    pub guardrails: ProxyGuardrailConfig,

    #[serde(default)]
    pub capability: CapabilityConfig,

    #[serde(default)]
    pub session_token: SessionTokenConfig,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub session_limits: SessionLimitConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub exec: ExecConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfigSpec {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            guardrails: default_guardrails(),
            capability: CapabilityConfig::default(),
            session_token: SessionTokenConfig::default(),
            rate_limits: RateLimitConfig::default(),
            session_limits: SessionLimitConfig::default(),
            services: ServicesConfig::default(),
            exec: ExecConfig::default(),
            websocket: WebSocketConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// The gateway's own probe listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for `/healthz` and `/readyz`
    #[serde(default = "default_server_listen")]
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_server_listen(),
        }
    }
}

/// The sandbox backend the gateway forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// "http" or "https"
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_upstream_host")]
    pub host: String,

    #[serde(default = "default_upstream_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Retries after the first attempt, idempotent methods only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Shared secret for X-Gateway-Auth (supports "env:VAR_NAME")
    #[serde(default = "default_internal_auth_secret")]
    pub internal_auth_secret: String,
}

impl UpstreamConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_upstream_host(),
            port: default_upstream_port(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_retries: default_max_retries(),
            backoff: BackoffConfig::default(),
            internal_auth_secret: default_internal_auth_secret(),
        }
    }
}

/// Exponential backoff: `base_ms * factor^attempt`, capped at `max_ms`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub factor: f64,

    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

impl BackoffConfig {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.min(32) as i32);
        let ms = (self.base_ms as f64 * exp).min(self.max_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            factor: default_backoff_factor(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default = "default_token_issuer")]
    pub issuer: String,

    #[serde(default = "default_token_audience")]
    pub audience: String,

    /// Ed25519 private key PEM (supports "env:VAR_NAME" and "file:PATH").
    /// Only needed by processes that issue tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Ed25519 public key PEM (supports "env:VAR_NAME" and "file:PATH")
    #[serde(default = "default_capability_public_key")]
    pub public_key: String,

    #[serde(default = "default_capability_ttl")]
    pub default_ttl_seconds: u64,

    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,

    #[serde(default = "default_replay_ttl")]
    pub replay_ttl_seconds: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            issuer: default_token_issuer(),
            audience: default_token_audience(),
            private_key: None,
            public_key: default_capability_public_key(),
            default_ttl_seconds: default_capability_ttl(),
            replay_capacity: default_replay_capacity(),
            replay_ttl_seconds: default_replay_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenConfig {
    /// HMAC secret (supports "env:VAR_NAME" and "file:PATH")
    #[serde(default = "default_session_secret")]
    pub secret: String,

    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,

    #[serde(default = "default_max_renewals")]
    pub max_renewals: u32,
}

impl Default for SessionTokenConfig {
    fn default() -> Self {
        Self {
            secret: default_session_secret(),
            ttl_seconds: default_session_ttl(),
            max_renewals: default_max_renewals(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Upstream major API version this gateway speaks
    #[serde(default = "default_expected_api_major")]
    pub expected_api_major: u64,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_version_path")]
    pub version_path: String,
}

impl ServicesConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
            circuit_breaker: CircuitBreakerConfig::default(),
            expected_api_major: default_expected_api_major(),
            health_path: default_health_path(),
            version_path: default_version_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default)]
    pub policy: ExecPolicy,

    #[serde(default)]
    pub templates: Vec<ExecTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_queue_max_size")]
    pub queue_max_size: usize,

    #[serde(default = "default_high_water_ratio")]
    pub high_water_ratio: f64,

    #[serde(default = "default_low_water_ratio")]
    pub low_water_ratio: f64,

    #[serde(default = "default_dispatch_batch_size")]
    pub dispatch_batch_size: usize,

    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    #[serde(default = "default_reap_interval_seconds")]
    pub reap_interval_seconds: u64,
}

impl WebSocketConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            queue_max_size: default_queue_max_size(),
            high_water_ratio: default_high_water_ratio(),
            low_water_ratio: default_low_water_ratio(),
            dispatch_batch_size: default_dispatch_batch_size(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            reap_interval_seconds: default_reap_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("compact" or "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus exporter listen address
    #[serde(default = "default_metrics_listen")]
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: default_metrics_listen(),
        }
    }
}

// Default value functions
fn default_guardrails() -> ProxyGuardrailConfig {
    ProxyGuardrailConfig {
        allowed_targets: vec![TargetAddr::new(default_upstream_host(), default_upstream_port())],
        allowed_path_prefixes: vec![
            "/api/".to_string(),
            default_health_path(),
            default_version_path(),
        ],
        ..ProxyGuardrailConfig::default()
    }
}

fn default_server_listen() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_upstream_host() -> String {
    "127.0.0.1".to_string()
}

fn default_upstream_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_internal_auth_secret() -> String {
    "env:WSGW_INTERNAL_AUTH_SECRET".to_string()
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_max_ms() -> u64 {
    2_000
}

fn default_token_issuer() -> String {
    "workspace-gateway".to_string()
}

fn default_token_audience() -> String {
    "workspace-gateway".to_string()
}

fn default_capability_public_key() -> String {
    "env:WSGW_CAPABILITY_PUBLIC_KEY".to_string()
}

fn default_capability_ttl() -> u64 {
    300
}

fn default_replay_capacity() -> usize {
    10_000
}

fn default_replay_ttl() -> u64 {
    3_600
}

fn default_session_secret() -> String {
    "env:WSGW_SESSION_SECRET".to_string()
}

fn default_session_ttl() -> u64 {
    900
}

fn default_max_renewals() -> u32 {
    8
}

fn default_cache_ttl() -> u64 {
    5
}

fn default_expected_api_major() -> u64 {
    1
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_version_path() -> String {
    "/version".to_string()
}

fn default_queue_max_size() -> usize {
    100
}

fn default_high_water_ratio() -> f64 {
    0.8
}

fn default_low_water_ratio() -> f64 {
    0.5
}

fn default_dispatch_batch_size() -> usize {
    32
}

fn default_dispatch_interval_ms() -> u64 {
    50
}

fn default_reap_interval_seconds() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9464".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "workspace-gateway".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: GatewayConfigSpec::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. WSGW_CONFIG_PATH environment variable
    /// 2. ./gateway-config.yaml (working directory)
    /// 3. ~/.wsgw/config.yaml (user home)
    /// 4. /etc/wsgw/config.yaml (system, Unix) or C:\ProgramData\Wsgw\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./gateway-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".wsgw").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/wsgw/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Wsgw\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(&config_path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", config_path, e))?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("WSGW_UPSTREAM_HOST") {
            if !host.trim().is_empty() {
                tracing::info!("Environment override: WSGW_UPSTREAM_HOST");
                self.spec.upstream.host = host;
            }
        }

        if let Ok(val) = std::env::var("WSGW_UPSTREAM_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: WSGW_UPSTREAM_PORT={}", port);
                    self.spec.upstream.port = port;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for WSGW_UPSTREAM_PORT: '{}'. Expected a port number. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(level) = std::env::var("WSGW_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.spec.observability.logging.level = level;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.trim().is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;

        if spec.server.listen_address.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!(
                "spec.server.listen_address must be a socket address, got '{}'",
                spec.server.listen_address
            );
        }

        let upstream = &spec.upstream;
        if upstream.scheme != "http" && upstream.scheme != "https" {
            anyhow::bail!("spec.upstream.scheme must be 'http' or 'https', got '{}'", upstream.scheme);
        }
        if upstream.host.trim().is_empty() {
            anyhow::bail!("spec.upstream.host cannot be empty");
        }
        if upstream.request_timeout_ms == 0 {
            anyhow::bail!("spec.upstream.request_timeout_ms must be greater than zero");
        }
        if upstream.backoff.factor < 1.0 {
            anyhow::bail!("spec.upstream.backoff.factor must be at least 1.0");
        }
        if upstream.internal_auth_secret.trim().is_empty() {
            anyhow::bail!("spec.upstream.internal_auth_secret cannot be empty");
        }

        let guardrails = &spec.guardrails;
        if guardrails.allowed_targets.is_empty() {
            anyhow::bail!("spec.guardrails.allowed_targets cannot be empty");
        }
        if guardrails.allowed_path_prefixes.is_empty() {
            anyhow::bail!("spec.guardrails.allowed_path_prefixes cannot be empty");
        }
        if guardrails.allowed_methods.is_empty() {
            anyhow::bail!("spec.guardrails.allowed_methods cannot be empty");
        }
        if guardrails.max_response_bytes == 0 {
            anyhow::bail!("spec.guardrails.max_response_bytes must be greater than zero");
        }
        let upstream_allowed = guardrails.allowed_targets.iter().any(|t| {
            t.host.eq_ignore_ascii_case(&upstream.host) && t.port == upstream.port
        });
        if !upstream_allowed {
            anyhow::bail!(
                "spec.upstream target is not listed in spec.guardrails.allowed_targets"
            );
        }

        let capability = &spec.capability;
        if capability.issuer.trim().is_empty() || capability.audience.trim().is_empty() {
            anyhow::bail!("spec.capability.issuer and spec.capability.audience cannot be empty");
        }
        if capability.public_key.trim().is_empty() {
            anyhow::bail!("spec.capability.public_key cannot be empty");
        }
        if !(5..=3600).contains(&capability.default_ttl_seconds) {
            anyhow::bail!("spec.capability.default_ttl_seconds must be within 5..=3600");
        }
        if capability.replay_capacity == 0 || capability.replay_ttl_seconds == 0 {
            anyhow::bail!("spec.capability replay capacity and TTL must be greater than zero");
        }

        if spec.session_token.secret.trim().is_empty() {
            anyhow::bail!("spec.session_token.secret cannot be empty");
        }
        if spec.session_token.ttl_seconds == 0 {
            anyhow::bail!("spec.session_token.ttl_seconds must be greater than zero");
        }

        for (scope, limit) in [
            ("api", spec.rate_limits.api),
            ("exec", spec.rate_limits.exec),
            ("websocket", spec.rate_limits.websocket),
        ] {
            validate_window(scope, limit)?;
        }

        let limits = &spec.session_limits;
        if limits.idle_timeout_seconds == 0
            || limits.absolute_timeout_seconds == 0
            || limits.reattach_timeout_seconds == 0
        {
            anyhow::bail!("spec.session_limits timeouts must be greater than zero");
        }
        if limits.idle_timeout_seconds > limits.absolute_timeout_seconds {
            anyhow::bail!("spec.session_limits.idle_timeout_seconds cannot exceed absolute_timeout_seconds");
        }
        if limits.max_concurrent_sessions == 0 {
            anyhow::bail!("spec.session_limits.max_concurrent_sessions must be greater than zero");
        }

        if spec.services.circuit_breaker.failure_threshold == 0 {
            anyhow::bail!("spec.services.circuit_breaker.failure_threshold must be greater than zero");
        }

        let mut template_ids = HashSet::new();
        for template in &spec.exec.templates {
            if !template_ids.insert(template.id.as_str()) {
                anyhow::bail!("Duplicate exec template id: {}", template.id);
            }
            spec.exec
                .policy
                .validate(template)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
        }

        let ws = &spec.websocket;
        if ws.queue_max_size == 0 || ws.dispatch_batch_size == 0 {
            anyhow::bail!("spec.websocket queue size and dispatch batch size must be greater than zero");
        }
        if !(0.0 <= ws.low_water_ratio && ws.low_water_ratio < ws.high_water_ratio && ws.high_water_ratio <= 1.0) {
            anyhow::bail!(
                "spec.websocket water marks must satisfy 0 <= low < high <= 1 (low={}, high={})",
                ws.low_water_ratio,
                ws.high_water_ratio
            );
        }
        if ws.dispatch_interval_ms == 0 || ws.reap_interval_seconds == 0 {
            anyhow::bail!("spec.websocket tick intervals must be greater than zero");
        }

        let format = spec.observability.logging.format.as_str();
        if format != "compact" && format != "json" {
            anyhow::bail!("spec.observability.logging.format must be 'compact' or 'json'");
        }

        let metrics = &spec.observability.metrics;
        if metrics.enabled && metrics.listen_address.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!(
                "spec.observability.metrics.listen_address must be a socket address, got '{}'",
                metrics.listen_address
            );
        }

        Ok(())
    }
}

fn validate_window(scope: &str, limit: WindowLimit) -> anyhow::Result<()> {
    if limit.max_requests == 0 || limit.window_seconds == 0 {
        anyhow::bail!(
            "spec.rate_limits.{} requires max_requests and window_seconds greater than zero",
            scope
        );
    }
    Ok(())
}
