// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use super::claims::{CapabilityClaims, CapabilityTokenError, MAX_TTL_SECONDS, MIN_TTL_SECONDS};

/// Verifies capability tokens against the Ed25519 public key.
///
/// Validation never errors: anything short of a well-formed, correctly signed,
/// unexpired token for this issuer and audience yields `None`.
pub struct CapabilityTokenValidator {
    decoding_key: DecodingKey,
    expected_issuer: String,
    expected_audience: String,
}

impl CapabilityTokenValidator {
    pub fn new(public_pem: &str, expected_issuer: &str, expected_audience: &str) -> Result<Self, CapabilityTokenError> {
        if expected_issuer.is_empty() || expected_audience.is_empty() {
            return Err(CapabilityTokenError::InvalidKey(
                "expected issuer and audience must not be empty".to_string(),
            ));
        }
        let decoding_key = DecodingKey::from_ed_pem(public_pem.as_bytes())
            .map_err(|e| CapabilityTokenError::InvalidKey(e.to_string()))?;
        Ok(Self {
            decoding_key,
            expected_issuer: expected_issuer.to_string(),
            expected_audience: expected_audience.to_string(),
        })
    }

    pub fn validate_token(&self, token: &str) -> Option<CapabilityClaims> {
        self.validate_token_at(token, chrono::Utc::now().timestamp())
    }

    /// Validate as of `now` (Unix seconds). A token is still valid at `now == exp`.
    pub fn validate_token_at(&self, token: &str, now: i64) -> Option<CapabilityClaims> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        // Expiry is checked below against the caller's clock.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.set_issuer(&[&self.expected_issuer]);
        validation.set_audience(&[&self.expected_audience]);

        let claims = match decode::<CapabilityClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "Capability token rejected");
                return None;
            }
        };

        if now > claims.exp {
            tracing::debug!(jti = %claims.jti, "Capability token expired");
            return None;
        }

        let ttl = claims.exp - claims.iat;
        if ttl < MIN_TTL_SECONDS as i64 || ttl > MAX_TTL_SECONDS as i64 {
            tracing::debug!(jti = %claims.jti, "Capability token TTL out of range");
            return None;
        }

        if claims.workspace_id.trim().is_empty()
            || claims.jti.is_empty()
            || claims.ops.is_empty()
            || claims.ops.iter().any(|op| op.trim().is_empty())
        {
            tracing::debug!("Capability token has empty required claims");
            return None;
        }

        Some(claims)
    }
}
