// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rate Limiting and Concurrency Caps
//!
//! Sliding-window request counters and per-namespace concurrency tracking.
//! State is in-memory and process-scoped; it resets on restart.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Enforce request rates and concurrent-session limits per key

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

/// A request was rejected because its key is over budget for the window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded for {key}; retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub key: String,
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Retry delay rounded up to whole seconds, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let rounded = if self.retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
        rounded.max(1)
    }
}

/// A namespace already holds its maximum number of live sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Concurrency limit reached: {current}/{limit}")]
pub struct ConcurrencyLimitExceeded {
    pub current: usize,
    pub limit: usize,
}

/// Requests allowed per window for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl WindowLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_api_limit")]
    pub api: WindowLimit,

    #[serde(default = "default_exec_limit")]
    pub exec: WindowLimit,

    #[serde(default = "default_websocket_limit")]
    pub websocket: WindowLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api: default_api_limit(),
            exec: default_exec_limit(),
            websocket: default_websocket_limit(),
        }
    }
}

fn default_api_limit() -> WindowLimit {
    WindowLimit { max_requests: 120, window_seconds: 60 }
}

fn default_exec_limit() -> WindowLimit {
    WindowLimit { max_requests: 10, window_seconds: 60 }
}

fn default_websocket_limit() -> WindowLimit {
    WindowLimit { max_requests: 30, window_seconds: 60 }
}

/// Sliding-window counter keyed by caller.
///
/// Each key keeps the timestamps of its admitted requests. A timestamp stops
/// counting once it is a full window old, so a key over budget recovers
/// exactly `window` after its oldest admitted request.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    max_requests: u32,
    window: Duration,
    entries: HashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowCounter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: HashMap::new(),
        }
    }

    pub fn from_limit(limit: WindowLimit) -> Self {
        Self::new(limit.max_requests, limit.window())
    }

    /// Admit one request for `key` at `now`, or report how long to wait.
    pub fn check(&mut self, key: &str, now: Instant) -> Result<(), RateLimitExceeded> {
        let window = self.window;
        let timestamps = self.entries.entry(key.to_string()).or_default();
        Self::prune(timestamps, window, now);

        if timestamps.len() >= self.max_requests as usize {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let elapsed = now.saturating_duration_since(oldest);
            return Err(RateLimitExceeded {
                key: key.to_string(),
                retry_after: window.saturating_sub(elapsed),
            });
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Number of admitted requests still inside the window.
    pub fn count(&mut self, key: &str, now: Instant) -> usize {
        let window = self.window;
        match self.entries.get_mut(key) {
            Some(timestamps) => {
                Self::prune(timestamps, window, now);
                timestamps.len()
            }
            None => 0,
        }
    }

    /// Drop keys whose every timestamp has aged out. Returns how many went.
    pub fn purge_idle(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.entries.len();
        self.entries.retain(|_, timestamps| {
            Self::prune(timestamps, window, now);
            !timestamps.is_empty()
        });
        before - self.entries.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    fn prune(timestamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
        while let Some(front) = timestamps.front() {
            if now.saturating_duration_since(*front) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// What kind of traffic a rate-limit check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Api,
    Exec,
    WebSocket,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Exec => "exec",
            Self::WebSocket => "websocket",
        }
    }
}

/// Process-scoped limiter holding one sliding window per scope.
pub struct RateLimiter {
    api: Mutex<SlidingWindowCounter>,
    exec: Mutex<SlidingWindowCounter>,
    websocket: Mutex<SlidingWindowCounter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            api: Mutex::new(SlidingWindowCounter::from_limit(config.api)),
            exec: Mutex::new(SlidingWindowCounter::from_limit(config.exec)),
            websocket: Mutex::new(SlidingWindowCounter::from_limit(config.websocket)),
        }
    }

    pub fn check(&self, scope: RateLimitScope, key: &str, now: Instant) -> Result<(), RateLimitExceeded> {
        let result = self.counter(scope).lock().check(key, now);
        if let Err(ref e) = result {
            tracing::warn!(scope = scope.as_str(), retry_after = ?e.retry_after, "Rate limit exceeded");
            metrics::counter!("gateway_rate_limit_rejections_total", "scope" => scope.as_str()).increment(1);
        }
        result
    }

    pub fn purge_idle(&self, now: Instant) -> usize {
        self.api.lock().purge_idle(now)
            + self.exec.lock().purge_idle(now)
            + self.websocket.lock().purge_idle(now)
    }

    fn counter(&self, scope: RateLimitScope) -> &Mutex<SlidingWindowCounter> {
        match scope {
            RateLimitScope::Api => &self.api,
            RateLimitScope::Exec => &self.exec,
            RateLimitScope::WebSocket => &self.websocket,
        }
    }
}

/// Tracks live session ids per namespace against a shared cap.
pub struct ConcurrencyTracker {
    max_concurrent_sessions: usize,
    active: Mutex<HashMap<String, HashSet<String>>>,
}

impl ConcurrencyTracker {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            max_concurrent_sessions,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a slot for `id`. Claiming an id that already holds a slot is a no-op.
    pub fn acquire(&self, namespace: &str, id: &str) -> Result<(), ConcurrencyLimitExceeded> {
        let mut active = self.active.lock();
        let ids = active.entry(namespace.to_string()).or_default();

        if ids.contains(id) {
            return Ok(());
        }
        if ids.len() >= self.max_concurrent_sessions {
            return Err(ConcurrencyLimitExceeded {
                current: ids.len(),
                limit: self.max_concurrent_sessions,
            });
        }
        ids.insert(id.to_string());
        Ok(())
    }

    /// Free the slot held by `id`. Returns whether a slot was actually held.
    pub fn release(&self, namespace: &str, id: &str) -> bool {
        let mut active = self.active.lock();
        let Some(ids) = active.get_mut(namespace) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            active.remove(namespace);
        }
        removed
    }

    pub fn active(&self, namespace: &str) -> usize {
        self.active.lock().get(namespace).map_or(0, HashSet::len)
    }

    pub fn limit(&self) -> usize {
        self.max_concurrent_sessions
    }
}
