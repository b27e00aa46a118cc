// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub const MIN_TTL_SECONDS: u64 = 5;
pub const MAX_TTL_SECONDS: u64 = 3600;

/// Grants every operation.
pub const WILDCARD_ALL: &str = "*";

/// Decoded capability token payload. Every field is required at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    pub workspace_id: String,
    pub ops: BTreeSet<String>,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl CapabilityClaims {
    pub fn allows(&self, op: &str) -> bool {
        validate_operation(self, op)
    }
}

/// Whether `claims` grant `op`.
///
/// Matches exactly, on the global `"*"`, or on a namespace grant `"ns:*"`
/// which covers `ns:<anything>`. No other wildcard forms are honoured.
pub fn validate_operation(claims: &CapabilityClaims, op: &str) -> bool {
    if op.is_empty() {
        return false;
    }
    claims.ops.iter().any(|granted| {
        if granted == op || granted == WILDCARD_ALL {
            return true;
        }
        match granted.strip_suffix(":*") {
            Some(ns) if !ns.is_empty() && !ns.contains('*') => op
                .strip_prefix(ns)
                .and_then(|rest| rest.strip_prefix(':'))
                .is_some_and(|rest| !rest.is_empty()),
            _ => false,
        }
    })
}

#[derive(Debug, Error)]
pub enum CapabilityTokenError {
    #[error("TTL must be between {MIN_TTL_SECONDS} and {MAX_TTL_SECONDS} seconds, got {0}")]
    InvalidTtl(u64),

    #[error("Capability token must grant at least one operation")]
    EmptyOperations,

    #[error("Invalid operation: {0:?}")]
    InvalidOperation(String),

    #[error("Workspace id cannot be empty")]
    InvalidWorkspace,

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Failed to sign capability token: {0}")]
    Signing(String),
}
