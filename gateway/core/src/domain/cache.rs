// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! TTL-stamped cached value used in front of upstream probes.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CachedResult<T> {
    pub value: T,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<T> CachedResult<T> {
    pub fn new(value: T, fetched_at: Instant, ttl: Duration) -> Self {
        Self { value, fetched_at, ttl }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) >= self.ttl
    }

    /// The value if still fresh at `now`.
    pub fn fresh(&self, now: Instant) -> Option<&T> {
        if self.is_expired(now) {
            None
        } else {
            Some(&self.value)
        }
    }
}
