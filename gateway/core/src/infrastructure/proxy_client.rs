// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Guardrailed Proxy Client
//!
//! The only path by which the gateway talks to the sandbox backend.
//!
//! ```text
//! request ──► method/target/path guardrails ──► sanitize headers ──► sign
//!         ──► send (no redirects, hard timeout, bounded retries if idempotent)
//!         ──► status/size guardrails ──► bounded body read ──► sanitize headers
//! ```
//!
//! Every failure leaves as a [`GatewayError`] with a fixed message; upstream
//! detail is logged after redaction and never returned.

use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::error::GatewayError;
use crate::domain::gateway_config::{BackoffConfig, UpstreamConfig};
use crate::domain::guardrail::{
    sanitize_request_headers, sanitize_response_headers, validate_method, validate_path,
    validate_response_size, validate_response_status, validate_target, DenyReason,
    GuardrailVerdict, ProxyGuardrailConfig, INTERNAL_AUTH_HEADER, INTERNAL_TIMESTAMP_HEADER,
};
use crate::infrastructure::error_normalizer::{classify_transport_error, from_denial};
use crate::infrastructure::internal_auth::InternalAuthSigner;

#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub params: Vec<(String, String)>,
}

impl ProxyRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            params: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, GatewayError> {
        let body = serde_json::to_vec(value).map_err(|_| GatewayError::internal())?;
        self.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Decode the body as JSON. A body that does not match `T` is an upstream
    /// contract failure.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            tracing::warn!(error = %e, status = self.status_code, "Upstream returned undecodable JSON");
            GatewayError::provider_error()
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

enum AttemptError {
    /// Connection-level failure; eligible for retry.
    Transport(reqwest::Error),
    /// Final outcome, never retried.
    Rejected(GatewayError),
}

pub struct GuardrailedProxyClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    port: u16,
    guardrails: ProxyGuardrailConfig,
    signer: InternalAuthSigner,
    max_retries: u32,
    backoff: BackoffConfig,
}

impl GuardrailedProxyClient {
    pub fn new(
        upstream: &UpstreamConfig,
        guardrails: ProxyGuardrailConfig,
        signer: InternalAuthSigner,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(upstream.request_timeout())
            .connect_timeout(upstream.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build upstream HTTP client: {}", e))?;

        Ok(Self {
            http,
            base_url: upstream.base_url(),
            host: upstream.host.clone(),
            port: upstream.port,
            guardrails,
            signer,
            max_retries: upstream.max_retries,
            backoff: upstream.backoff,
        })
    }

    pub fn guardrails(&self) -> &ProxyGuardrailConfig {
        &self.guardrails
    }

    pub async fn get(&self, path: &str) -> Result<ProxyResponse, GatewayError> {
        self.request(ProxyRequest::get(path)).await
    }

    /// Forward `req`, retrying transport failures for idempotent methods.
    pub async fn request(&self, req: ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        let attempts = if req.is_idempotent() { self.max_retries + 1 } else { 1 };
        self.execute(req, attempts).await
    }

    /// Forward `req` with a single attempt. For callers that run their own
    /// retry policy.
    pub async fn request_once(&self, req: ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        self.execute(req, 1).await
    }

    async fn execute(&self, req: ProxyRequest, attempts: u32) -> Result<ProxyResponse, GatewayError> {
        self.preflight(&req)?;

        let mut last_error = None;

        for attempt in 0..attempts {
            match self.attempt(&req).await {
                Ok(response) => {
                    metrics::counter!(
                        "gateway_upstream_requests_total",
                        "method" => req.method.to_string(),
                        "outcome" => "ok"
                    )
                    .increment(1);
                    return Ok(response);
                }
                Err(AttemptError::Rejected(e)) => {
                    metrics::counter!(
                        "gateway_upstream_requests_total",
                        "method" => req.method.to_string(),
                        "outcome" => e.category().as_str()
                    )
                    .increment(1);
                    return Err(e);
                }
                Err(AttemptError::Transport(e)) => {
                    let normalized = classify_transport_error(&e);
                    tracing::warn!(
                        method = %req.method,
                        attempt = attempt + 1,
                        attempts,
                        category = normalized.category().as_str(),
                        "Upstream request failed"
                    );
                    last_error = Some(normalized);

                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(GatewayError::transport);
        metrics::counter!(
            "gateway_upstream_requests_total",
            "method" => req.method.to_string(),
            "outcome" => err.category().as_str()
        )
        .increment(1);
        Err(err)
    }

    fn preflight(&self, req: &ProxyRequest) -> Result<(), GatewayError> {
        let checks = [
            validate_method(req.method.as_str(), &self.guardrails),
            validate_target(&self.host, self.port, &self.guardrails),
            validate_path(&req.path, &self.guardrails),
        ];
        for verdict in checks {
            if let GuardrailVerdict::Denied(reason) = verdict {
                return Err(from_denial(&reason));
            }
        }
        Ok(())
    }

    async fn attempt(&self, req: &ProxyRequest) -> Result<ProxyResponse, AttemptError> {
        let mut headers = sanitize_request_headers(&req.headers);
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.signer.sign(req.method.as_str(), &req.path, timestamp);
        headers.insert(INTERNAL_TIMESTAMP_HEADER, HeaderValue::from(timestamp));
        if let Ok(value) = HeaderValue::from_str(&signature) {
            headers.insert(INTERNAL_AUTH_HEADER, value);
        }

        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self
            .http
            .request(req.method.clone(), url)
            .headers(headers);
        if !req.params.is_empty() {
            builder = builder.query(&req.params);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        tracing::debug!(method = %req.method, path = %req.path, "Forwarding upstream request");
        let mut response = builder.send().await.map_err(AttemptError::Transport)?;

        let status = response.status().as_u16();
        if let GuardrailVerdict::Denied(reason) = validate_response_status(status, &self.guardrails) {
            return Err(AttemptError::Rejected(from_denial(&reason)));
        }
        if status >= 500 {
            tracing::warn!(status, method = %req.method, "Upstream returned server error");
            return Err(AttemptError::Rejected(GatewayError::provider_error()));
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let GuardrailVerdict::Denied(reason) = validate_response_size(declared, &self.guardrails) {
            return Err(AttemptError::Rejected(from_denial(&reason)));
        }

        let headers = sanitize_response_headers(response.headers());
        let limit = self.guardrails.max_response_bytes;
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(AttemptError::Transport)? {
            let size = body.len() as u64 + chunk.len() as u64;
            if size > limit {
                return Err(AttemptError::Rejected(from_denial(&DenyReason::ResponseTooLarge {
                    size,
                    limit,
                })));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(ProxyResponse {
            status_code: status,
            headers,
            body: body.freeze(),
        })
    }
}

