// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// One recorded token id.
#[derive(Debug, Clone, Copy)]
struct ReplayEntry {
    first_seen: Instant,
    /// The token's own `exp` in Unix seconds.
    token_exp: i64,
}

/// Bounded record of token ids already used.
///
/// An entry stays live until both the store TTL has elapsed and the token it
/// came from has expired, so a token can never outlive its own replay record.
/// Entries are never promoted on read, so eviction at capacity always drops
/// the oldest-inserted id. Dead entries read as absent and are removed on
/// that read.
pub struct JtiReplayStore {
    seen: Mutex<LruCache<String, ReplayEntry>>,
    ttl: Duration,
}

impl JtiReplayStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn is_replayed(&self, jti: &str, now: Instant, now_epoch: i64) -> bool {
        let mut seen = self.seen.lock();
        Self::live(&mut seen, jti, self.ttl, now, now_epoch)
    }

    /// Record `jti` for a token expiring at `token_exp` (Unix seconds).
    pub fn record_jti(&self, jti: &str, token_exp: i64, now: Instant) {
        self.seen.lock().put(
            jti.to_string(),
            ReplayEntry {
                first_seen: now,
                token_exp,
            },
        );
    }

    /// Record `jti` unless it is already live. Returns `true` if it was a replay.
    pub fn check_and_record(&self, jti: &str, token_exp: i64, now: Instant, now_epoch: i64) -> bool {
        let mut seen = self.seen.lock();
        if Self::live(&mut seen, jti, self.ttl, now, now_epoch) {
            return true;
        }
        seen.put(
            jti.to_string(),
            ReplayEntry {
                first_seen: now,
                token_exp,
            },
        );
        false
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    fn live(
        seen: &mut LruCache<String, ReplayEntry>,
        jti: &str,
        ttl: Duration,
        now: Instant,
        now_epoch: i64,
    ) -> bool {
        let Some(entry) = seen.peek(jti).copied() else {
            return false;
        };
        let within_ttl = now.saturating_duration_since(entry.first_seen) < ttl;
        let token_valid = now_epoch <= entry.token_exp;
        if within_ttl || token_valid {
            return true;
        }
        seen.pop(jti);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPOCH: i64 = 1_700_000_000;

    #[test]
    fn test_records_and_detects_replay() {
        let store = JtiReplayStore::new(10, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(!store.check_and_record("a", EPOCH + 30, t0, EPOCH));
        assert!(store.check_and_record("a", EPOCH + 30, t0 + Duration::from_secs(1), EPOCH + 1));
        assert!(store.is_replayed("a", t0 + Duration::from_secs(59), EPOCH + 59));
    }

    #[test]
    fn test_lazy_expiry_removes_entry() {
        let store = JtiReplayStore::new(10, Duration::from_secs(60));
        let t0 = Instant::now();
        store.record_jti("a", EPOCH + 30, t0);
        assert_eq!(store.len(), 1);
        assert!(!store.is_replayed("a", t0 + Duration::from_secs(60), EPOCH + 60));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_entry_outlives_short_store_ttl_until_token_expires() {
        let store = JtiReplayStore::new(10, Duration::from_secs(30));
        let t0 = Instant::now();
        let exp = EPOCH + 3600;
        assert!(!store.check_and_record("long-lived", exp, t0, EPOCH));

        let later = t0 + Duration::from_secs(60);
        assert!(store.check_and_record("long-lived", exp, later, EPOCH + 60));
        assert!(store.is_replayed("long-lived", t0 + Duration::from_secs(3600), exp));

        // Past both the store TTL and the token's own expiry.
        assert!(!store.is_replayed("long-lived", t0 + Duration::from_secs(3601), exp + 1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_evicts_oldest_inserted() {
        let store = JtiReplayStore::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        store.record_jti("a", EPOCH + 60, t0);
        store.record_jti("b", EPOCH + 60, t0);
        // Reads do not refresh recency.
        assert!(store.is_replayed("a", t0, EPOCH));
        store.record_jti("c", EPOCH + 60, t0);

        assert!(!store.is_replayed("a", t0, EPOCH));
        assert!(store.is_replayed("b", t0, EPOCH));
        assert!(store.is_replayed("c", t0, EPOCH));
    }
}
