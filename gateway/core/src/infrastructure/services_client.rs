// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Services Client
//!
//! Health and version probes against the sandbox backend, each behind the
//! shared circuit breaker and a short TTL cache. Probe failures never surface
//! as errors: they degrade to an `unhealthy` / incompatible report with a
//! fixed detail string.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::cache::CachedResult;
use crate::domain::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::domain::error::{ErrorCategory, GatewayError};
use crate::domain::gateway_config::{BackoffConfig, ServicesConfig};
use crate::infrastructure::proxy_client::{GuardrailedProxyClient, ProxyRequest};

const DETAIL_CIRCUIT_OPEN: &str = "Upstream temporarily unavailable";
const DETAIL_PROBE_FAILED: &str = "Upstream health check failed";
const DETAIL_VERSION_FAILED: &str = "Upstream version check failed";
const DETAIL_UPSTREAM_UNHEALTHY: &str = "Upstream reported unhealthy";
const DETAIL_VERSION_MISMATCH: &str = "Upstream API version is not supported";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    fn unhealthy(detail: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: Some(detail.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReport {
    pub version: Option<String>,
    pub compatible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl VersionReport {
    fn incompatible(version: Option<String>, detail: &str) -> Self {
        Self {
            version,
            compatible: false,
            detail: Some(detail.to_string()),
        }
    }
}

/// Raw `/health` body.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthPayload {
    pub status: String,
}

/// Raw `/version` body.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionPayload {
    pub version: String,
}

/// One attempt at each upstream probe. Retries, breaker and caching live in
/// [`ServicesClient`].
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    async fn health(&self) -> Result<HealthPayload, GatewayError>;
    async fn version(&self) -> Result<VersionPayload, GatewayError>;
}

/// Probes through the guardrailed proxy (`GET /health`, `GET /version`).
pub struct ProxyHealthProbe {
    proxy: Arc<GuardrailedProxyClient>,
    health_path: String,
    version_path: String,
}

impl ProxyHealthProbe {
    pub fn new(proxy: Arc<GuardrailedProxyClient>, config: &ServicesConfig) -> Self {
        Self {
            proxy,
            health_path: config.health_path.clone(),
            version_path: config.version_path.clone(),
        }
    }
}

#[async_trait]
impl UpstreamProbe for ProxyHealthProbe {
    async fn health(&self) -> Result<HealthPayload, GatewayError> {
        let response = self.proxy.request_once(ProxyRequest::get(&self.health_path)).await?;
        if !response.is_success() {
            return Err(GatewayError::provider_error());
        }
        response.json()
    }

    async fn version(&self) -> Result<VersionPayload, GatewayError> {
        let response = self.proxy.request_once(ProxyRequest::get(&self.version_path)).await?;
        if !response.is_success() {
            return Err(GatewayError::provider_error());
        }
        response.json()
    }
}

pub struct ServicesClient {
    probe: Arc<dyn UpstreamProbe>,
    breaker: Mutex<CircuitBreaker>,
    health_cache: Mutex<Option<CachedResult<HealthReport>>>,
    version_cache: Mutex<Option<CachedResult<VersionReport>>>,
    cache_ttl: Duration,
    max_retries: u32,
    backoff: BackoffConfig,
    expected_api_major: u64,
}

impl ServicesClient {
    pub fn new(
        probe: Arc<dyn UpstreamProbe>,
        config: &ServicesConfig,
        max_retries: u32,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            probe,
            breaker: Mutex::new(CircuitBreaker::from_config(&config.circuit_breaker)),
            health_cache: Mutex::new(None),
            version_cache: Mutex::new(None),
            cache_ttl: config.cache_ttl(),
            max_retries,
            backoff,
            expected_api_major: config.expected_api_major,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().state(Instant::now())
    }

    pub async fn check_health(&self) -> HealthReport {
        if let Some(hit) = fresh(&self.health_cache) {
            return hit;
        }
        if !self.breaker.lock().allow_request(Instant::now()) {
            tracing::debug!("Health probe skipped, circuit open");
            return HealthReport::unhealthy(DETAIL_CIRCUIT_OPEN);
        }

        let report = match self.probe_with_retries(|| self.probe.health()).await {
            Ok(payload) => {
                self.breaker.lock().record_success();
                health_from_payload(&payload)
            }
            Err(e) => {
                self.breaker.lock().record_failure(Instant::now());
                tracing::warn!(category = e.category().as_str(), "Upstream health probe failed");
                return HealthReport::unhealthy(DETAIL_PROBE_FAILED);
            }
        };

        store(&self.health_cache, report.clone(), self.cache_ttl);
        report
    }

    pub async fn check_version(&self) -> VersionReport {
        if let Some(hit) = fresh(&self.version_cache) {
            return hit;
        }
        if !self.breaker.lock().allow_request(Instant::now()) {
            tracing::debug!("Version probe skipped, circuit open");
            return VersionReport::incompatible(None, DETAIL_CIRCUIT_OPEN);
        }

        let report = match self.probe_with_retries(|| self.probe.version()).await {
            Ok(payload) => {
                self.breaker.lock().record_success();
                self.version_from_payload(payload)
            }
            Err(e) => {
                self.breaker.lock().record_failure(Instant::now());
                tracing::warn!(category = e.category().as_str(), "Upstream version probe failed");
                return VersionReport::incompatible(None, DETAIL_VERSION_FAILED);
            }
        };

        store(&self.version_cache, report.clone(), self.cache_ttl);
        report
    }

    /// Healthy or degraded, and speaking a compatible API version.
    pub async fn is_ready(&self) -> bool {
        let health = self.check_health().await;
        if health.status == HealthStatus::Unhealthy {
            return false;
        }
        self.check_version().await.compatible
    }

    async fn probe_with_retries<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_transport_failure(e.category()) && attempt < self.max_retries => {
                    tracing::debug!(attempt = attempt + 1, "Retrying upstream probe");
                    tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn version_from_payload(&self, payload: VersionPayload) -> VersionReport {
        match parse_major(&payload.version) {
            Some(major) if major == self.expected_api_major => VersionReport {
                version: Some(payload.version),
                compatible: true,
                detail: None,
            },
            _ => VersionReport::incompatible(Some(payload.version), DETAIL_VERSION_MISMATCH),
        }
    }
}

fn is_transport_failure(category: ErrorCategory) -> bool {
    matches!(
        category,
        ErrorCategory::ProviderUnavailable | ErrorCategory::ProviderTimeout | ErrorCategory::TransportError
    )
}

fn health_from_payload(payload: &HealthPayload) -> HealthReport {
    match payload.status.to_ascii_lowercase().as_str() {
        "ok" | "healthy" => HealthReport {
            status: HealthStatus::Ok,
            detail: None,
        },
        "degraded" => HealthReport {
            status: HealthStatus::Degraded,
            detail: None,
        },
        _ => HealthReport::unhealthy(DETAIL_UPSTREAM_UNHEALTHY),
    }
}

/// Major component of a semver-like version string (`"v2.1.0"` -> 2).
pub fn parse_major(version: &str) -> Option<u64> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    trimmed.split(['.', '-', '+']).next()?.parse().ok()
}

fn fresh<T: Clone>(cache: &Mutex<Option<CachedResult<T>>>) -> Option<T> {
    cache
        .lock()
        .as_ref()
        .and_then(|c| c.fresh(Instant::now()).cloned())
}

fn store<T>(cache: &Mutex<Option<CachedResult<T>>>, value: T, ttl: Duration) {
    *cache.lock() = Some(CachedResult::new(value, Instant::now(), ttl));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit_breaker::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProbe {
        calls: AtomicU32,
        fail_first: u32,
        failure: GatewayError,
        status: &'static str,
        version: &'static str,
    }

    impl ScriptedProbe {
        fn healthy() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: 0,
                failure: GatewayError::provider_unavailable(),
                status: "ok",
                version: "1.4.2",
            }
        }

        fn failing(fail_first: u32, failure: GatewayError) -> Self {
            Self {
                fail_first,
                failure,
                ..Self::healthy()
            }
        }

        fn next(&self) -> Result<(), GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.failure.clone())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl UpstreamProbe for ScriptedProbe {
        async fn health(&self) -> Result<HealthPayload, GatewayError> {
            self.next()?;
            Ok(HealthPayload {
                status: self.status.to_string(),
            })
        }

        async fn version(&self) -> Result<VersionPayload, GatewayError> {
            self.next()?;
            Ok(VersionPayload {
                version: self.version.to_string(),
            })
        }
    }

    fn config(cache_ttl_seconds: u64, threshold: u32) -> ServicesConfig {
        ServicesConfig {
            cache_ttl_seconds,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_seconds: 60,
            },
            ..ServicesConfig::default()
        }
    }

    fn backoff() -> BackoffConfig {
        BackoffConfig {
            base_ms: 1,
            factor: 2.0,
            max_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_healthy_and_cached() {
        let probe = Arc::new(ScriptedProbe::healthy());
        let client = ServicesClient::new(probe.clone(), &config(60, 3), 2, backoff());

        let report = client.check_health().await;
        assert_eq!(report.status, HealthStatus::Ok);
        client.check_health().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        assert!(client.is_ready().await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let probe = Arc::new(ScriptedProbe::failing(2, GatewayError::provider_timeout()));
        let client = ServicesClient::new(probe.clone(), &config(0, 3), 2, backoff());

        let report = client.check_health().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_non_transport_failure_not_retried() {
        let probe = Arc::new(ScriptedProbe::failing(1, GatewayError::provider_error()));
        let client = ServicesClient::new(probe.clone(), &config(0, 3), 2, backoff());

        let report = client.check_health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.detail.as_deref(), Some(DETAIL_PROBE_FAILED));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let probe = Arc::new(ScriptedProbe::failing(u32::MAX, GatewayError::provider_unavailable()));
        let client = ServicesClient::new(probe.clone(), &config(0, 2), 1, backoff());

        client.check_health().await;
        client.check_health().await;
        assert_eq!(client.circuit_state(), CircuitState::Open);
        let calls = probe.calls.load(Ordering::SeqCst);
        assert_eq!(calls, 4);

        let report = client.check_health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.detail.as_deref(), Some(DETAIL_CIRCUIT_OPEN));
        let version = client.check_version().await;
        assert!(!version.compatible);
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
        assert!(!client.is_ready().await);
    }

    #[tokio::test]
    async fn test_version_compatibility() {
        let probe = Arc::new(ScriptedProbe {
            version: "v2.0.1",
            ..ScriptedProbe::healthy()
        });
        let client = ServicesClient::new(probe, &config(0, 3), 0, backoff());
        let report = client.check_version().await;
        assert_eq!(report.version.as_deref(), Some("v2.0.1"));
        assert!(!report.compatible);
        assert_eq!(report.detail.as_deref(), Some(DETAIL_VERSION_MISMATCH));
    }

    #[tokio::test]
    async fn test_degraded_is_ready() {
        let probe = Arc::new(ScriptedProbe {
            status: "degraded",
            ..ScriptedProbe::healthy()
        });
        let client = ServicesClient::new(probe, &config(0, 3), 0, backoff());
        assert!(client.is_ready().await);
    }

    #[test]
    fn test_parse_major() {
        assert_eq!(parse_major("1.4.2"), Some(1));
        assert_eq!(parse_major("v3"), Some(3));
        assert_eq!(parse_major("2-beta"), Some(2));
        assert_eq!(parse_major("latest"), None);
        assert_eq!(parse_major(""), None);
    }
}
