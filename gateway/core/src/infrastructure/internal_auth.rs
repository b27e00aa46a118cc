// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Internal Auth Signer
//!
//! Signs every outbound request so the sandbox backend can tell gateway
//! traffic from anything else on the internal network.
//!
//! ```text
//! X-Gateway-Timestamp: <unix seconds>
//! X-Gateway-Auth:      hex(HMAC-SHA256(secret, "METHOD\npath\ntimestamp"))
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::gateway_config::SecretString;

type HmacSha256 = Hmac<Sha256>;

pub struct InternalAuthSigner {
    secret: SecretString,
}

impl InternalAuthSigner {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Hex signature for `method` and `path` at `timestamp`.
    pub fn sign(&self, method: &str, path: &str, timestamp: i64) -> String {
        hex::encode(self.mac(method, path, timestamp))
    }

    /// Constant-time check of a received signature. Also rejects timestamps
    /// more than `max_skew_secs` away from `now`.
    pub fn verify(
        &self,
        method: &str,
        path: &str,
        timestamp: i64,
        signature_hex: &str,
        now: i64,
        max_skew_secs: i64,
    ) -> bool {
        let max_skew = u64::try_from(max_skew_secs).unwrap_or(0);
        if now.abs_diff(timestamp) > max_skew {
            return false;
        }
        let Ok(received) = hex::decode(signature_hex) else {
            return false;
        };
        let expected = self.mac(method, path, timestamp);
        expected.ct_eq(received.as_slice()).into()
    }

    fn mac(&self, method: &str, path: &str, timestamp: i64) -> Vec<u8> {
        let message = format!("{}\n{}\n{}", method.to_ascii_uppercase(), path, timestamp);
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = match HmacSha256::new_from_slice(self.secret.expose().as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };
        mac.update(message.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> InternalAuthSigner {
        InternalAuthSigner::new(SecretString::new("internal-secret"))
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer();
        let sig = signer.sign("get", "/api/files/list", 1000);
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, signer.sign("GET", "/api/files/list", 1000));
        assert!(signer.verify("GET", "/api/files/list", 1000, &sig, 1010, 30));
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        let signer = signer();
        let sig = signer.sign("GET", "/api/files/list", 1000);
        assert!(!signer.verify("POST", "/api/files/list", 1000, &sig, 1000, 30));
        assert!(!signer.verify("GET", "/api/files/other", 1000, &sig, 1000, 30));
        assert!(!signer.verify("GET", "/api/files/list", 1001, &sig, 1000, 30));
        assert!(!signer.verify("GET", "/api/files/list", 1000, "zz", 1000, 30));
        assert!(!signer.verify("GET", "/api/files/list", 1000, &sig, 1100, 30));

        let other = InternalAuthSigner::new(SecretString::new("other"));
        assert!(!other.verify("GET", "/api/files/list", 1000, &sig, 1000, 30));
    }

    #[test]
    fn test_verify_rejects_extreme_timestamps() {
        let signer = signer();
        let sig = signer.sign("GET", "/", i64::MIN);
        assert!(!signer.verify("GET", "/", i64::MIN, &sig, i64::MAX, 30));
        assert!(!signer.verify("GET", "/", i64::MAX, &sig, i64::MIN, 30));
        assert!(!signer.verify("GET", "/", 1000, &sig, 1000, -1));
        assert!(signer.verify("GET", "/", i64::MIN, &sig, i64::MIN + 5, 30));
    }
}
