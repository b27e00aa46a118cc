// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error Normalizer
//!
//! Collapses every internal failure into the closed [`ErrorCategory`] taxonomy
//! with a fixed browser-safe message. The original detail is logged (after
//! redaction) and never returned.

use crate::domain::error::{ErrorCategory, GatewayError};
use crate::domain::exec_session::ExecSessionError;
use crate::domain::guardrail::DenyReason;
use crate::domain::rate_limit::{ConcurrencyLimitExceeded, RateLimitExceeded};
use crate::infrastructure::capability::CapabilityTokenError;
use crate::infrastructure::redaction::redact_secrets;
use crate::infrastructure::session_token::SessionTokenError;

/// Map any error into a [`GatewayError`]. Unknown error types become
/// `internal_error`.
pub fn normalize_error(err: &anyhow::Error) -> GatewayError {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<GatewayError>() {
            return e.clone();
        }
        if let Some(e) = cause.downcast_ref::<RateLimitExceeded>() {
            return GatewayError::rate_limited(e.retry_after_secs());
        }
        if cause.downcast_ref::<ConcurrencyLimitExceeded>().is_some() {
            return GatewayError::new(ErrorCategory::RateLimit, "Too many concurrent sessions");
        }
        if let Some(e) = cause.downcast_ref::<DenyReason>() {
            return from_denial(e);
        }
        if let Some(e) = cause.downcast_ref::<SessionTokenError>() {
            return e.clone().into();
        }
        if cause.downcast_ref::<CapabilityTokenError>().is_some() {
            return GatewayError::auth("Invalid capability token request");
        }
        if let Some(e) = cause.downcast_ref::<ExecSessionError>() {
            return e.into();
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return classify_transport_error(e);
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            return classify_io_error(e);
        }
    }

    tracing::warn!(error = %redact_secrets(&format!("{err:#}")), "Unclassified gateway error");
    GatewayError::internal()
}

/// Browser-safe error for a guardrail denial. The reason itself is logged.
pub fn from_denial(reason: &DenyReason) -> GatewayError {
    tracing::warn!(reason = %redact_secrets(&reason.to_string()), "Guardrail denied request");
    metrics::counter!("gateway_guardrail_denials_total").increment(1);

    match reason {
        DenyReason::MethodNotAllowed(_) => GatewayError::validation("Method not permitted"),
        DenyReason::EmptyTargetAllowlist | DenyReason::TargetNotAllowed { .. } => {
            GatewayError::validation("Target not permitted")
        }
        DenyReason::EmptyPathAllowlist
        | DenyReason::PathNotAllowed(_)
        | DenyReason::PathTraversal(_)
        | DenyReason::InvalidPath(_) => GatewayError::validation("Path not permitted"),
        DenyReason::RedirectNotAllowed(_) | DenyReason::ResponseTooLarge { .. } => {
            GatewayError::provider_error()
        }
    }
}

/// Classify a transport failure from the HTTP client.
pub fn classify_transport_error(err: &reqwest::Error) -> GatewayError {
    tracing::warn!(error = %redact_secrets(&err.to_string()), "Upstream transport failure");

    if err.is_timeout() {
        GatewayError::provider_timeout()
    } else if err.is_connect() {
        GatewayError::provider_unavailable()
    } else if err.is_redirect() || err.is_body() || err.is_decode() {
        GatewayError::provider_error()
    } else {
        GatewayError::transport()
    }
}

fn classify_io_error(err: &std::io::Error) -> GatewayError {
    use std::io::ErrorKind;

    tracing::warn!(error = %redact_secrets(&err.to_string()), "Upstream I/O failure");
    match err.kind() {
        ErrorKind::TimedOut => GatewayError::provider_timeout(),
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
            GatewayError::provider_unavailable()
        }
        _ => GatewayError::transport(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::time::Duration;

    #[test]
    fn test_passes_gateway_error_through_context() {
        let err = anyhow::Error::new(GatewayError::not_found("Exec session not found"))
            .context("while attaching");
        let normalized = normalize_error(&err);
        assert_eq!(normalized.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let err = anyhow::Error::new(RateLimitExceeded {
            key: "user-1".to_string(),
            retry_after: Duration::from_millis(2500),
        });
        let normalized = normalize_error(&err);
        assert_eq!(normalized.http_status(), 429);
        assert_eq!(normalized.retry_after(), Some(3));
        assert!(!normalized.message().contains("user-1"));
    }

    #[test]
    fn test_denials_are_generic() {
        let normalized = from_denial(&DenyReason::TargetNotAllowed {
            host: "169.254.169.254".to_string(),
            port: 80,
        });
        assert_eq!(normalized.category(), ErrorCategory::ValidationError);
        assert!(!normalized.message().contains("169.254"));

        let normalized = from_denial(&DenyReason::ResponseTooLarge { size: 10, limit: 1 });
        assert_eq!(normalized.http_status(), 502);
    }

    #[test]
    fn test_io_errors() {
        let err = anyhow::Error::new(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert_eq!(normalize_error(&err).category(), ErrorCategory::ProviderTimeout);

        let err: anyhow::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused by 10.0.0.1:8080",
        ))
        .context("connecting");
        let normalized = normalize_error(&err.unwrap_err());
        assert_eq!(normalized.http_status(), 503);
        assert!(!normalized.message().contains("10.0.0.1"));
    }

    #[test]
    fn test_unknown_is_internal() {
        let err = anyhow::anyhow!("something odd at db.internal:5432");
        let normalized = normalize_error(&err);
        assert_eq!(normalized.category(), ErrorCategory::InternalError);
        assert_eq!(normalized.ws_close_code(), 1011);
        assert!(!normalized.to_body().error.contains("db.internal"));
    }
}
