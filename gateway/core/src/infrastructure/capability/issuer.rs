// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

use super::claims::{CapabilityClaims, CapabilityTokenError, MAX_TTL_SECONDS, MIN_TTL_SECONDS};

/// A freshly signed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedCapability {
    pub token: String,
    pub claims: CapabilityClaims,
}

/// Signs capability tokens with an Ed25519 private key (JWT `EdDSA`).
pub struct CapabilityTokenIssuer {
    encoding_key: EncodingKey,
    issuer: String,
    audience: String,
}

impl CapabilityTokenIssuer {
    pub fn new(private_pem: &str, issuer: &str, audience: &str) -> Result<Self, CapabilityTokenError> {
        let encoding_key = EncodingKey::from_ed_pem(private_pem.as_bytes())
            .map_err(|e| CapabilityTokenError::InvalidKey(e.to_string()))?;
        Ok(Self {
            encoding_key,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        })
    }

    pub fn issue_token<I, S>(
        &self,
        workspace_id: &str,
        ops: I,
        ttl: Duration,
    ) -> Result<IssuedCapability, CapabilityTokenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue_token_at(workspace_id, ops, ttl, chrono::Utc::now().timestamp())
    }

    /// Same as [`issue_token`](Self::issue_token) with an explicit issue time
    /// in Unix seconds.
    pub fn issue_token_at<I, S>(
        &self,
        workspace_id: &str,
        ops: I,
        ttl: Duration,
        now: i64,
    ) -> Result<IssuedCapability, CapabilityTokenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ttl_secs = ttl.as_secs();
        if ttl.subsec_nanos() != 0 || !(MIN_TTL_SECONDS..=MAX_TTL_SECONDS).contains(&ttl_secs) {
            return Err(CapabilityTokenError::InvalidTtl(ttl_secs));
        }
        if workspace_id.trim().is_empty() {
            return Err(CapabilityTokenError::InvalidWorkspace);
        }

        let mut granted = BTreeSet::new();
        for op in ops {
            let op = op.into();
            if op.trim().is_empty() || op.trim() != op {
                return Err(CapabilityTokenError::InvalidOperation(op));
            }
            granted.insert(op);
        }
        if granted.is_empty() {
            return Err(CapabilityTokenError::EmptyOperations);
        }

        let claims = CapabilityClaims {
            workspace_id: workspace_id.to_string(),
            ops: granted,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_secs as i64,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key)
            .map_err(|e| CapabilityTokenError::Signing(e.to_string()))?;

        tracing::debug!(
            workspace_id = %claims.workspace_id,
            jti = %claims.jti,
            ttl_secs,
            "Issued capability token"
        );

        Ok(IssuedCapability { token, claims })
    }
}
