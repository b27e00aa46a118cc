// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Lifecycle Clock
//!
//! Tracks the three timers that decide when a real-time session must be torn
//! down: absolute age, idle time, and (only while the socket is gone) the
//! reattach window.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLimitConfig {
    /// Teardown after this long without activity
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// Teardown this long after creation, regardless of activity
    #[serde(default = "default_absolute_timeout")]
    pub absolute_timeout_seconds: u64,

    /// Grace period for a disconnected client to come back
    #[serde(default = "default_reattach_timeout")]
    pub reattach_timeout_seconds: u64,

    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
}

impl SessionLimitConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn absolute_timeout(&self) -> Duration {
        Duration::from_secs(self.absolute_timeout_seconds)
    }

    pub fn reattach_timeout(&self) -> Duration {
        Duration::from_secs(self.reattach_timeout_seconds)
    }
}

impl Default for SessionLimitConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
            absolute_timeout_seconds: default_absolute_timeout(),
            reattach_timeout_seconds: default_reattach_timeout(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    30 * 60
}

fn default_absolute_timeout() -> u64 {
    8 * 60 * 60
}

fn default_reattach_timeout() -> u64 {
    60
}

fn default_max_concurrent_sessions() -> usize {
    8
}

/// Why a session was torn down by the lifecycle clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    AbsoluteTimeout,
    IdleTimeout,
    ReattachTimeout,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbsoluteTimeout => write!(f, "absolute_timeout"),
            Self::IdleTimeout => write!(f, "idle_timeout"),
            Self::ReattachTimeout => write!(f, "reattach_timeout"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    pub session_id: String,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    pub ws_disconnected_at: Option<Instant>,
}

impl SessionLifecycle {
    pub fn new(session_id: impl Into<String>, now: Instant) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_activity_at: now,
            ws_disconnected_at: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity_at = now;
    }

    pub fn mark_disconnected(&mut self, now: Instant) {
        if self.ws_disconnected_at.is_none() {
            self.ws_disconnected_at = Some(now);
        }
    }

    pub fn mark_reattached(&mut self, now: Instant) {
        self.ws_disconnected_at = None;
        self.last_activity_at = now;
    }

    pub fn is_disconnected(&self) -> bool {
        self.ws_disconnected_at.is_some()
    }

    /// First expired timer in priority order: absolute, idle, then reattach.
    pub fn should_terminate(&self, cfg: &SessionLimitConfig, now: Instant) -> Option<TerminationReason> {
        if now.saturating_duration_since(self.created_at) >= cfg.absolute_timeout() {
            return Some(TerminationReason::AbsoluteTimeout);
        }
        if now.saturating_duration_since(self.last_activity_at) >= cfg.idle_timeout() {
            return Some(TerminationReason::IdleTimeout);
        }
        if let Some(disconnected_at) = self.ws_disconnected_at {
            if now.saturating_duration_since(disconnected_at) >= cfg.reattach_timeout() {
                return Some(TerminationReason::ReattachTimeout);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SessionLimitConfig {
        SessionLimitConfig {
            idle_timeout_seconds: 60,
            absolute_timeout_seconds: 600,
            reattach_timeout_seconds: 30,
            max_concurrent_sessions: 4,
        }
    }

    #[test]
    fn test_fresh_session_survives() {
        let t0 = Instant::now();
        let lifecycle = SessionLifecycle::new("s1", t0);
        assert_eq!(lifecycle.should_terminate(&cfg(), t0 + Duration::from_secs(59)), None);
    }

    #[test]
    fn test_idle_timeout() {
        let t0 = Instant::now();
        let mut lifecycle = SessionLifecycle::new("s1", t0);
        lifecycle.touch(t0 + Duration::from_secs(50));
        assert_eq!(lifecycle.should_terminate(&cfg(), t0 + Duration::from_secs(100)), None);
        assert_eq!(
            lifecycle.should_terminate(&cfg(), t0 + Duration::from_secs(110)),
            Some(TerminationReason::IdleTimeout)
        );
    }

    #[test]
    fn test_absolute_timeout_wins_over_idle() {
        let t0 = Instant::now();
        let lifecycle = SessionLifecycle::new("s1", t0);
        assert_eq!(
            lifecycle.should_terminate(&cfg(), t0 + Duration::from_secs(600)),
            Some(TerminationReason::AbsoluteTimeout)
        );
    }

    #[test]
    fn test_reattach_only_while_disconnected() {
        let t0 = Instant::now();
        let mut lifecycle = SessionLifecycle::new("s1", t0);
        lifecycle.touch(t0 + Duration::from_secs(10));
        lifecycle.mark_disconnected(t0 + Duration::from_secs(10));

        assert_eq!(lifecycle.should_terminate(&cfg(), t0 + Duration::from_secs(39)), None);
        assert_eq!(
            lifecycle.should_terminate(&cfg(), t0 + Duration::from_secs(40)),
            Some(TerminationReason::ReattachTimeout)
        );

        lifecycle.mark_reattached(t0 + Duration::from_secs(35));
        assert!(!lifecycle.is_disconnected());
        assert_eq!(lifecycle.should_terminate(&cfg(), t0 + Duration::from_secs(45)), None);
    }

    #[test]
    fn test_repeated_disconnect_keeps_first_timestamp() {
        let t0 = Instant::now();
        let mut lifecycle = SessionLifecycle::new("s1", t0);
        lifecycle.mark_disconnected(t0);
        lifecycle.mark_disconnected(t0 + Duration::from_secs(20));
        assert_eq!(lifecycle.ws_disconnected_at, Some(t0));
    }
}
