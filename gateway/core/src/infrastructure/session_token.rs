// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Token Codec
//!
//! Opaque, renewable token binding a caller to a single exec/PTY/chat session.
//!
//! Wire format: `header.payload.signature`, each part base64url without
//! padding. The signature is HMAC-SHA256 over `header "." payload`. The
//! signature is verified in constant time before anything in the payload is
//! trusted, including its expiry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use crate::domain::error::GatewayError;
use crate::domain::gateway_config::SecretString;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: u32 = 1;
const TOKEN_ALG: &str = "HS256";
const TOKEN_TYP: &str = "GWS";

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokenPayload {
    pub session_id: String,
    pub template_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub renewal_count: u32,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionTokenError {
    #[error("Malformed session token: {0}")]
    Malformed(&'static str),

    #[error("Invalid session token signature")]
    InvalidSignature,

    #[error("Session token expired")]
    Expired,

    #[error("Maximum renewals reached ({0})")]
    MaxRenewals(u32),

    #[error("Session token secret is not usable")]
    InvalidSecret,
}

impl From<SessionTokenError> for GatewayError {
    fn from(err: SessionTokenError) -> Self {
        match err {
            SessionTokenError::InvalidSecret => GatewayError::internal(),
            SessionTokenError::MaxRenewals(_) => {
                GatewayError::auth("Session token cannot be renewed further")
            }
            _ => GatewayError::auth("Invalid or expired session token"),
        }
    }
}

pub fn issue(secret: &[u8], session_id: &str, template_id: &str, ttl: Duration) -> Result<String, SessionTokenError> {
    issue_at(secret, session_id, template_id, ttl, chrono::Utc::now().timestamp())
}

/// Deterministic for identical inputs.
pub fn issue_at(
    secret: &[u8],
    session_id: &str,
    template_id: &str,
    ttl: Duration,
    now: i64,
) -> Result<String, SessionTokenError> {
    let payload = SessionTokenPayload {
        session_id: session_id.to_string(),
        template_id: template_id.to_string(),
        issued_at: now,
        expires_at: expiry(now, ttl)?,
        renewal_count: 0,
        version: TOKEN_VERSION,
    };
    encode(secret, &payload)
}

pub fn validate(token: &str, secret: &[u8]) -> Result<SessionTokenPayload, SessionTokenError> {
    validate_at(token, secret, chrono::Utc::now().timestamp())
}

/// Valid while `now <= expires_at`.
pub fn validate_at(token: &str, secret: &[u8], now: i64) -> Result<SessionTokenPayload, SessionTokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
        return Err(SessionTokenError::Malformed("expected three parts"));
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| SessionTokenError::Malformed("header is not base64url"))?;
    let header: TokenHeader = serde_json::from_slice(&header_bytes)
        .map_err(|_| SessionTokenError::Malformed("header is not valid JSON"))?;
    if header.alg != TOKEN_ALG || header.typ != TOKEN_TYP {
        return Err(SessionTokenError::Malformed("unsupported header"));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| SessionTokenError::Malformed("signature is not base64url"))?;

    let mut mac = mac_for(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| SessionTokenError::InvalidSignature)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SessionTokenError::Malformed("payload is not base64url"))?;
    let payload: SessionTokenPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|_| SessionTokenError::Malformed("payload is not valid JSON"))?;
    if payload.version != TOKEN_VERSION {
        return Err(SessionTokenError::Malformed("unsupported version"));
    }

    if now > payload.expires_at {
        return Err(SessionTokenError::Expired);
    }

    Ok(payload)
}

pub fn renew(token: &str, secret: &[u8], ttl: Duration, max_renewals: u32) -> Result<String, SessionTokenError> {
    renew_at(token, secret, ttl, max_renewals, chrono::Utc::now().timestamp())
}

/// Validate `token`, then reissue it with a fresh expiry and `renewal_count + 1`.
pub fn renew_at(
    token: &str,
    secret: &[u8],
    ttl: Duration,
    max_renewals: u32,
    now: i64,
) -> Result<String, SessionTokenError> {
    let current = validate_at(token, secret, now)?;
    if current.renewal_count >= max_renewals {
        return Err(SessionTokenError::MaxRenewals(max_renewals));
    }

    let renewed = SessionTokenPayload {
        issued_at: now,
        expires_at: expiry(now, ttl)?,
        renewal_count: current.renewal_count + 1,
        ..current
    };
    encode(secret, &renewed)
}

fn expiry(now: i64, ttl: Duration) -> Result<i64, SessionTokenError> {
    i64::try_from(ttl.as_secs())
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or(SessionTokenError::Malformed("expiry out of range"))
}

fn encode(secret: &[u8], payload: &SessionTokenPayload) -> Result<String, SessionTokenError> {
    let header = TokenHeader {
        alg: TOKEN_ALG.to_string(),
        typ: TOKEN_TYP.to_string(),
    };
    let header_json = serde_json::to_vec(&header).map_err(|_| SessionTokenError::Malformed("header"))?;
    let payload_json = serde_json::to_vec(payload).map_err(|_| SessionTokenError::Malformed("payload"))?;

    let header_b64 = URL_SAFE_NO_PAD.encode(header_json);
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);

    let mut mac = mac_for(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{header_b64}.{payload_b64}.{signature_b64}"))
}

fn mac_for(secret: &[u8]) -> Result<HmacSha256, SessionTokenError> {
    if secret.is_empty() {
        return Err(SessionTokenError::InvalidSecret);
    }
    HmacSha256::new_from_slice(secret).map_err(|_| SessionTokenError::InvalidSecret)
}

/// Process-scoped codec holding the configured secret and renewal policy.
pub struct SessionTokenCodec {
    secret: SecretString,
    ttl: Duration,
    max_renewals: u32,
}

impl SessionTokenCodec {
    pub fn new(secret: SecretString, ttl: Duration, max_renewals: u32) -> Self {
        Self {
            secret,
            ttl,
            max_renewals,
        }
    }

    pub fn issue(&self, session_id: &str, template_id: &str) -> Result<String, SessionTokenError> {
        issue(self.secret.expose().as_bytes(), session_id, template_id, self.ttl)
    }

    pub fn validate(&self, token: &str) -> Result<SessionTokenPayload, SessionTokenError> {
        validate(token, self.secret.expose().as_bytes())
    }

    pub fn renew(&self, token: &str) -> Result<String, SessionTokenError> {
        renew(token, self.secret.expose().as_bytes(), self.ttl, self.max_renewals)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_renewals(&self) -> u32 {
        self.max_renewals
    }
}
