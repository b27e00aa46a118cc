// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use std::time::Instant;

use super::claims::{validate_operation, CapabilityClaims};
use super::replay_store::JtiReplayStore;
use super::validator::CapabilityTokenValidator;
use crate::domain::error::GatewayError;

/// Whether a successful authorization consumes the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenUse {
    /// The token may authorize any number of calls until it expires.
    Reusable,
    /// The token id is recorded and any later presentation is rejected.
    SingleUse,
}

/// Request-path entry point: validate, check the operation, then (for
/// single-use operations) record the token id.
pub struct CapabilityGuard {
    validator: Arc<CapabilityTokenValidator>,
    replay_store: Arc<JtiReplayStore>,
}

impl CapabilityGuard {
    pub fn new(validator: Arc<CapabilityTokenValidator>, replay_store: Arc<JtiReplayStore>) -> Self {
        Self {
            validator,
            replay_store,
        }
    }

    pub fn authorize(&self, token: &str, op: &str, token_use: TokenUse, now: Instant) -> Result<CapabilityClaims, GatewayError> {
        self.authorize_at(token, op, token_use, now, chrono::Utc::now().timestamp())
    }

    /// As [`authorize`](Self::authorize) with an explicit wall clock for expiry.
    pub fn authorize_at(
        &self,
        token: &str,
        op: &str,
        token_use: TokenUse,
        now: Instant,
        now_epoch: i64,
    ) -> Result<CapabilityClaims, GatewayError> {
        let Some(claims) = self.validator.validate_token_at(token, now_epoch) else {
            tracing::warn!(operation = op, "Capability token invalid");
            return Err(GatewayError::auth("Invalid or expired capability token"));
        };

        if !validate_operation(&claims, op) {
            tracing::warn!(
                operation = op,
                workspace_id = %claims.workspace_id,
                "Capability token does not grant operation"
            );
            return Err(GatewayError::auth("Operation not permitted by capability token"));
        }

        if token_use == TokenUse::SingleUse
            && self
                .replay_store
                .check_and_record(&claims.jti, claims.exp, now, now_epoch)
        {
            tracing::warn!(jti = %claims.jti, "Capability token replay rejected");
            return Err(GatewayError::auth("Capability token already used"));
        }

        Ok(claims)
    }
}
