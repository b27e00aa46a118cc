// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Browser-Safe Error Taxonomy
//!
//! Every failure that can reach the browser is expressed as a [`GatewayError`]
//! carrying one [`ErrorCategory`]. The category alone decides the HTTP status
//! and the WebSocket close code, so the mapping is total and closed:
//!
//! | Category               | HTTP | WS close |
//! |------------------------|------|----------|
//! | `bad_request`          | 400  | 4000     |
//! | `auth`                 | 401  | 4001     |
//! | `not_found`            | 404  | 4004     |
//! | `conflict`             | 409  | 4009     |
//! | `validation_error`     | 422  | 4022     |
//! | `rate_limit`           | 429  | 4029     |
//! | `provider_error`       | 502  | 4502     |
//! | `provider_unavailable` | 503  | 4503     |
//! | `provider_timeout`     | 504  | 4504     |
//! | `transport_error`      | 502  | 4505     |
//! | `internal_error`       | 502  | 1011     |
//!
//! Messages are fixed strings chosen by gateway code. Upstream bodies,
//! transport-library errors, hostnames and ports never end up in `message`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// WebSocket close codes owned by the gateway.
///
/// The 4000-4999 range is reserved for gateway denial semantics and every
/// code below is unique. `INTERNAL_ERROR` is the standard 1011.
pub mod ws_close {
    pub const BAD_REQUEST: u16 = 4000;
    pub const AUTH_REQUIRED: u16 = 4001;
    pub const SESSION_NOT_FOUND: u16 = 4004;
    pub const CONFLICT: u16 = 4009;
    pub const SESSION_TERMINATED: u16 = 4010;
    pub const VALIDATION_ERROR: u16 = 4022;
    pub const RATE_LIMITED: u16 = 4029;
    pub const PROVIDER_ERROR: u16 = 4502;
    pub const PROVIDER_UNAVAILABLE: u16 = 4503;
    pub const PROVIDER_TIMEOUT: u16 = 4504;
    pub const TRANSPORT_ERROR: u16 = 4505;
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Every gateway-owned close code, for uniqueness checks.
    pub const ALL: [u16; 12] = [
        BAD_REQUEST,
        AUTH_REQUIRED,
        SESSION_NOT_FOUND,
        CONFLICT,
        SESSION_TERMINATED,
        VALIDATION_ERROR,
        RATE_LIMITED,
        PROVIDER_ERROR,
        PROVIDER_UNAVAILABLE,
        PROVIDER_TIMEOUT,
        TRANSPORT_ERROR,
        INTERNAL_ERROR,
    ];
}

/// Closed set of error categories exposed to browser clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BadRequest,
    NotFound,
    Conflict,
    ValidationError,
    Auth,
    RateLimit,
    ProviderError,
    ProviderUnavailable,
    ProviderTimeout,
    TransportError,
    InternalError,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 11] = [
        ErrorCategory::BadRequest,
        ErrorCategory::NotFound,
        ErrorCategory::Conflict,
        ErrorCategory::ValidationError,
        ErrorCategory::Auth,
        ErrorCategory::RateLimit,
        ErrorCategory::ProviderError,
        ErrorCategory::ProviderUnavailable,
        ErrorCategory::ProviderTimeout,
        ErrorCategory::TransportError,
        ErrorCategory::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ValidationError => "validation_error",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::ProviderError => "provider_error",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderTimeout => "provider_timeout",
            Self::TransportError => "transport_error",
            Self::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Auth => 401,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::ValidationError => 422,
            Self::RateLimit => 429,
            Self::ProviderError => 502,
            Self::ProviderUnavailable => 503,
            Self::ProviderTimeout => 504,
            Self::TransportError => 502,
            Self::InternalError => 502,
        }
    }

    pub fn ws_close_code(&self) -> u16 {
        match self {
            Self::BadRequest => ws_close::BAD_REQUEST,
            Self::Auth => ws_close::AUTH_REQUIRED,
            Self::NotFound => ws_close::SESSION_NOT_FOUND,
            Self::Conflict => ws_close::CONFLICT,
            Self::ValidationError => ws_close::VALIDATION_ERROR,
            Self::RateLimit => ws_close::RATE_LIMITED,
            Self::ProviderError => ws_close::PROVIDER_ERROR,
            Self::ProviderUnavailable => ws_close::PROVIDER_UNAVAILABLE,
            Self::ProviderTimeout => ws_close::PROVIDER_TIMEOUT,
            Self::TransportError => ws_close::TRANSPORT_ERROR,
            Self::InternalError => ws_close::INTERNAL_ERROR,
        }
    }

    /// Whether a client retry can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ProviderUnavailable | Self::ProviderTimeout | Self::TransportError
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body returned to the browser for any HTTP error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// A normalized, browser-safe error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category}: {message}")]
pub struct GatewayError {
    category: ErrorCategory,
    message: String,
    retry_after: Option<u64>,
}

impl GatewayError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds.max(1));
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ValidationError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, message)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(ErrorCategory::RateLimit, "Too many requests").with_retry_after(retry_after_secs)
    }

    pub fn provider_error() -> Self {
        Self::new(ErrorCategory::ProviderError, "Upstream service error")
    }

    pub fn provider_unavailable() -> Self {
        Self::new(ErrorCategory::ProviderUnavailable, "Upstream service unavailable")
            .with_retry_after(5)
    }

    pub fn provider_timeout() -> Self {
        Self::new(ErrorCategory::ProviderTimeout, "Upstream service timed out").with_retry_after(5)
    }

    pub fn transport() -> Self {
        Self::new(ErrorCategory::TransportError, "Upstream request failed")
    }

    pub fn internal() -> Self {
        Self::new(ErrorCategory::InternalError, "Internal gateway error")
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    pub fn http_status(&self) -> u16 {
        self.category.http_status()
    }

    pub fn ws_close_code(&self) -> u16 {
        self.category.ws_close_code()
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.message.clone(),
            category: self.category,
            retry_after: self.retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_close_codes_are_unique_and_reserved() {
        let unique: HashSet<u16> = ws_close::ALL.iter().copied().collect();
        assert_eq!(unique.len(), ws_close::ALL.len());

        for code in ws_close::ALL {
            if code != ws_close::INTERNAL_ERROR {
                assert!((4000..=4999).contains(&code), "code {} outside reserved range", code);
            }
        }
    }

    #[test]
    fn test_category_mapping_is_total() {
        let mut close_codes = HashSet::new();
        for category in ErrorCategory::ALL {
            let status = category.http_status();
            assert!((400..=599).contains(&status));
            assert!(close_codes.insert(category.ws_close_code()));
        }
        assert_eq!(ErrorCategory::InternalError.ws_close_code(), 1011);
        assert_eq!(ErrorCategory::InternalError.http_status(), 502);
    }

    #[test]
    fn test_body_serialization() {
        let body = GatewayError::rate_limited(3).to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["category"], "rate_limit");
        assert_eq!(json["retry_after"], 3);
        assert_eq!(json["error"], "Too many requests");

        let body = GatewayError::not_found("Session not found").to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("retry_after").is_none());
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        assert_eq!(GatewayError::rate_limited(0).retry_after(), Some(1));
    }
}
