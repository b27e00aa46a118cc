// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{guardrails, proxy_for, proxy_with, split_host_port, upstream};
use gateway_core::domain::error::{ErrorCategory, GatewayError};
use gateway_core::domain::guardrail::{validate_path, validate_target, GuardrailVerdict, TargetAddr};
use gateway_core::infrastructure::proxy_client::ProxyRequest;
use mockito::Matcher;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::net::TcpListener;

/// No host, port or HTTP-library text may reach a browser-facing body.
fn assert_no_leak(err: &GatewayError, host: &str, port: u16) {
    let body = serde_json::to_string(&err.to_body()).unwrap();
    let port = port.to_string();
    for needle in [host, port.as_str(), "reqwest", "hyper", "error sending", "tcp"] {
        assert!(!body.contains(needle), "{needle:?} leaked in {body}");
    }
}

#[tokio::test]
async fn test_scenario_a_allowlisted_target_is_admitted() {
    let cfg = guardrails("workspace-service", 8443);
    assert_eq!(validate_target("workspace-service", 8443, &cfg), GuardrailVerdict::Allowed);
    assert_eq!(validate_path("/api/tree", &cfg), GuardrailVerdict::Allowed);
    assert!(matches!(validate_target("evil-host", 8443, &cfg), GuardrailVerdict::Denied(_)));

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/tree")
        .match_query(Matcher::UrlEncoded("path".into(), ".".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"entries":["src","Cargo.toml"]}"#)
        .expect(1)
        .create_async()
        .await;

    let proxy = proxy_for(&server.host_with_port());
    let response = proxy
        .request(ProxyRequest::get("/api/tree").with_param("path", "."))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["entries"][0], "src");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_scenario_a_disallowed_target_denied_before_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;
    let (host, port) = split_host_port(&server.host_with_port());

    // Upstream points at the live server, but only a different target is allowed.
    let proxy = proxy_with(upstream(&host, port), guardrails("workspace-service", 8443));
    let err = proxy
        .request(ProxyRequest::get("/api/tree").with_param("path", "."))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ValidationError);
    assert_no_leak(&err, &host, port);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_disallowed_paths_and_methods_never_hit_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;
    let proxy = proxy_for(&server.host_with_port());

    for path in ["/api/../admin", "/admin/users", "/api/%2e%2e/secrets", "api/files"] {
        let err = proxy.request(ProxyRequest::get(path)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ValidationError, "{path}");
    }

    let err = proxy
        .request(ProxyRequest::new(reqwest::Method::OPTIONS, "/api/files"))
        .await
        .unwrap_err();
    assert_eq!(err.message(), "Method not permitted");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_caller_credentials_replaced_by_internal_auth() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/files/write")
        .match_header("authorization", Matcher::Missing)
        .match_header("cookie", Matcher::Missing)
        .match_header("x-gateway-auth", Matcher::Regex("^[0-9a-f]{64}$".into()))
        .match_header("x-gateway-timestamp", Matcher::Regex(r"^\d+$".into()))
        .match_header("x-request-id", "abc-123")
        .match_body(Matcher::JsonString(r#"{"path":"README.md"}"#.into()))
        .with_status(201)
        .create_async()
        .await;

    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_static("Bearer browser-token"));
    headers.insert("cookie", HeaderValue::from_static("sid=abc"));
    headers.insert("x-gateway-auth", HeaderValue::from_static("forged"));
    headers.insert("x-request-id", HeaderValue::from_static("abc-123"));

    let proxy = proxy_for(&server.host_with_port());
    let request = ProxyRequest::post("/api/files/write")
        .with_headers(headers)
        .with_json(&serde_json::json!({ "path": "README.md" }))
        .unwrap();
    let response = proxy.request(request).await.unwrap();

    assert_eq!(response.status_code, 201);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upstream_5xx_becomes_generic_provider_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/git/status")
        .with_status(500)
        .with_body("panic at db.internal:5432 password=hunter2")
        .expect(1)
        .create_async()
        .await;
    let (host, port) = split_host_port(&server.host_with_port());

    let proxy = proxy_for(&server.host_with_port());
    let err = proxy.get("/api/git/status").await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ProviderError);
    assert_eq!(err.http_status(), 502);
    let body = serde_json::to_string(&err.to_body()).unwrap();
    assert!(!body.contains("db.internal"));
    assert!(!body.contains("hunter2"));
    assert_no_leak(&err, &host, port);
}

#[tokio::test]
async fn test_upstream_4xx_is_passed_through() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/files/missing.txt")
        .with_status(404)
        .with_body(r#"{"error":"not found"}"#)
        .create_async()
        .await;

    let proxy = proxy_for(&server.host_with_port());
    let response = proxy.get("/api/files/missing.txt").await.unwrap();
    assert_eq!(response.status_code, 404);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let mut server = mockito::Server::new_async().await;
    let redirect = server
        .mock("GET", "/api/files")
        .with_status(302)
        .with_header("location", "http://169.254.169.254/latest/meta-data")
        .expect(1)
        .create_async()
        .await;

    let proxy = proxy_for(&server.host_with_port());
    let err = proxy.get("/api/files").await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ProviderError);
    assert!(!err.message().contains("169.254"));
    redirect.assert_async().await;
}

#[tokio::test]
async fn test_oversized_response_rejected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/files/big.bin")
        .with_status(200)
        .with_body(vec![b'x'; 4096])
        .create_async()
        .await;
    let (host, port) = split_host_port(&server.host_with_port());

    let mut limits = guardrails(&host, port);
    limits.max_response_bytes = 1024;
    let proxy = proxy_with(upstream(&host, port), limits);

    let err = proxy.get("/api/files/big.bin").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ProviderError);
}

#[tokio::test]
async fn test_response_headers_sanitized() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/files")
        .with_status(200)
        .with_header("set-cookie", "session=upstream")
        .with_header("x-entry-count", "2")
        .with_body("[]")
        .create_async()
        .await;

    let proxy = proxy_for(&server.host_with_port());
    let response = proxy.get("/api/files").await.unwrap();
    assert!(response.headers.get("set-cookie").is_none());
    assert_eq!(response.headers.get("x-entry-count").unwrap(), "2");
    assert_eq!(response.text(), "[]");
}

#[tokio::test]
async fn test_connection_refused_is_503_without_detail() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let proxy = proxy_with(upstream("127.0.0.1", port), guardrails("127.0.0.1", port));
    let err = proxy.get("/api/files").await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ProviderUnavailable);
    assert_eq!(err.http_status(), 503);
    assert_no_leak(&err, "127.0.0.1", port);
}

/// Accepts connections and closes them immediately, counting attempts.
async fn hang_up_server() -> (u16, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicU32::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (port, accepted)
}

#[tokio::test]
async fn test_transport_failures_retried_for_idempotent_methods_only() {
    let (port, accepted) = hang_up_server().await;
    let proxy = proxy_with(upstream("127.0.0.1", port), guardrails("127.0.0.1", port));

    let err = proxy.get("/api/files").await.unwrap_err();
    assert!(err.category().is_retryable() || err.category() == ErrorCategory::ProviderError);
    assert_eq!(accepted.load(Ordering::SeqCst), 3);

    accepted.store(0, Ordering::SeqCst);
    let err = proxy
        .request(ProxyRequest::post("/api/exec/sessions").with_body("{}"))
        .await
        .unwrap_err();
    assert_no_leak(&err, "127.0.0.1", port);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_upstream_times_out_as_504() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut config = upstream("127.0.0.1", port);
    config.request_timeout_ms = 150;
    config.max_retries = 0;
    let proxy = proxy_with(config, guardrails("127.0.0.1", port));

    let started = std::time::Instant::now();
    let err = proxy.get("/api/files").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ProviderTimeout);
    assert_eq!(err.http_status(), 504);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_target_allowlist_is_exact() {
    let cfg = gateway_core::domain::guardrail::ProxyGuardrailConfig {
        allowed_targets: vec![TargetAddr::new("Workspace-Service", 8443)],
        ..guardrails("unused", 1)
    };
    assert_eq!(validate_target("workspace-service", 8443, &cfg), GuardrailVerdict::Allowed);
    for (host, port) in [
        ("workspace-service", 8444),
        ("workspace-service.evil.com", 8443),
        ("evil.workspace-service", 8443),
        ("10.0.0.1", 8443),
    ] {
        assert!(
            matches!(validate_target(host, port, &cfg), GuardrailVerdict::Denied(_)),
            "{host}:{port}"
        );
    }
}
