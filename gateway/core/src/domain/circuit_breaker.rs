// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Circuit Breaker
//!
//! Three-state gate in front of upstream probes.
//!
//! ```text
//! CLOSED ──(failures ≥ threshold)──► OPEN ──(recovery_timeout elapsed)──► HALF_OPEN
//!   ▲                                  ▲                                      │
//!   └────────────(success)─────────────┼──────────────────────────────────────┤
//!                                      └────────────(failure)─────────────────┘
//! ```
//!
//! While OPEN and inside the recovery window, [`CircuitBreaker::allow_request`]
//! returns `false` and the caller must not touch the network.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    30
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            last_failure_time: None,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_secs(config.recovery_timeout_seconds),
        )
    }

    /// Current state, promoting OPEN to HALF_OPEN once the recovery window has elapsed.
    pub fn state(&mut self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open {
            let recovered = self
                .last_failure_time
                .map_or(true, |t| now.saturating_duration_since(t) >= self.recovery_timeout);
            if recovered {
                tracing::info!("Circuit breaker half-open, allowing a probe");
                self.state = CircuitState::HalfOpen;
            }
        }
        self.state
    }

    pub fn allow_request(&mut self, now: Instant) -> bool {
        self.state(now) != CircuitState::Open
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            tracing::info!("Circuit breaker closed after successful probe");
        }
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);

        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.failure_count >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            tracing::warn!(
                failures = self.failure_count,
                "Circuit breaker opened"
            );
            metrics::counter!("gateway_circuit_breaker_open_total").increment(1);
            self.state = CircuitState::Open;
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.last_failure_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        let t0 = Instant::now();

        breaker.record_failure(t0);
        breaker.record_failure(t0);
        assert_eq!(breaker.state(t0), CircuitState::Closed);

        breaker.record_failure(t0);
        assert_eq!(breaker.state(t0), CircuitState::Open);
        assert!(!breaker.allow_request(t0 + Duration::from_secs(9)));
    }

    #[test]
    fn test_success_resets_streak() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        let t0 = Instant::now();

        breaker.record_failure(t0);
        breaker.record_failure(t0);
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        breaker.record_failure(t0);
        breaker.record_failure(t0);
        assert_eq!(breaker.state(t0), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let t0 = Instant::now();
        breaker.record_failure(t0);

        assert_eq!(breaker.state(t0 + Duration::from_secs(5)), CircuitState::Open);
        assert_eq!(breaker.state(t0 + Duration::from_secs(10)), CircuitState::HalfOpen);
        assert!(breaker.allow_request(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_half_open_outcomes() {
        let t0 = Instant::now();

        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        assert_eq!(breaker.state(t0 + Duration::from_secs(10)), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(t0 + Duration::from_secs(10)), CircuitState::Closed);

        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        let probe_at = t0 + Duration::from_secs(10);
        assert_eq!(breaker.state(probe_at), CircuitState::HalfOpen);
        breaker.record_failure(probe_at);
        assert_eq!(breaker.state(probe_at + Duration::from_secs(1)), CircuitState::Open);
        // The recovery window restarts from the failed probe.
        assert_eq!(breaker.state(probe_at + Duration::from_secs(10)), CircuitState::HalfOpen);
    }
}
