// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! WebSocket Lifecycle Policy
//!
//! Registry of live real-time sessions. Each session owns a bounded outbound
//! queue, a lifecycle clock and a cancellation token. The supervisor drives
//! [`WsLifecyclePolicy::dispatch_round`] and
//! [`WsLifecyclePolicy::run_reap_cycle`] on their own intervals; tests call
//! them directly.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::error::GatewayError;
use crate::domain::gateway_config::WebSocketConfig;
use crate::domain::lifecycle::{SessionLifecycle, SessionLimitConfig, TerminationReason};
use crate::domain::outbound_queue::{BoundedOutboundQueue, EnqueueOutcome, QueueStats};
use crate::domain::rate_limit::{ConcurrencyLimitExceeded, ConcurrencyTracker};

/// Concurrency namespace for real-time sessions.
pub const WS_NAMESPACE: &str = "ws";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Bytes),
}

impl OutboundFrame {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReapedSession {
    pub session_id: String,
    pub reason: TerminationReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapSummary {
    pub total_reaped: usize,
    pub reaped: Vec<ReapedSession>,
}

struct WsSessionEntry {
    queue: BoundedOutboundQueue<OutboundFrame>,
    lifecycle: SessionLifecycle,
    cancellation: CancellationToken,
}

pub struct WsLifecyclePolicy {
    sessions: Mutex<HashMap<String, WsSessionEntry>>,
    concurrency: Arc<ConcurrencyTracker>,
    limits: SessionLimitConfig,
    queue_max_size: usize,
    high_water_ratio: f64,
    low_water_ratio: f64,
    dispatch_batch_size: usize,
}

impl WsLifecyclePolicy {
    pub fn new(
        websocket: &WebSocketConfig,
        limits: SessionLimitConfig,
        concurrency: Arc<ConcurrencyTracker>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            concurrency,
            limits,
            queue_max_size: websocket.queue_max_size,
            high_water_ratio: websocket.high_water_ratio,
            low_water_ratio: websocket.low_water_ratio,
            dispatch_batch_size: websocket.dispatch_batch_size.max(1),
        }
    }

    /// Register `session_id`, or reattach it if it is already registered.
    /// Returns the token cancelled when the session is reaped or unregistered.
    pub fn register_session(
        &self,
        session_id: &str,
        now: Instant,
    ) -> Result<CancellationToken, ConcurrencyLimitExceeded> {
        let mut sessions = self.sessions.lock();

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.lifecycle.mark_reattached(now);
            debug!(session_id, "WebSocket session reattached");
            return Ok(entry.cancellation.clone());
        }

        self.concurrency.acquire(WS_NAMESPACE, session_id)?;
        let cancellation = CancellationToken::new();
        sessions.insert(
            session_id.to_string(),
            WsSessionEntry {
                queue: BoundedOutboundQueue::with_ratios(
                    self.queue_max_size,
                    self.high_water_ratio,
                    self.low_water_ratio,
                ),
                lifecycle: SessionLifecycle::new(session_id, now),
                cancellation: cancellation.clone(),
            },
        );
        info!(session_id, "WebSocket session registered");
        Ok(cancellation)
    }

    /// Drop `session_id`, cancel its tasks and free its slot.
    pub fn unregister_session(&self, session_id: &str) -> bool {
        let Some(entry) = self.sessions.lock().remove(session_id) else {
            return false;
        };
        entry.cancellation.cancel();
        self.concurrency.release(WS_NAMESPACE, session_id);
        info!(session_id, "WebSocket session unregistered");
        true
    }

    pub fn enqueue_message(
        &self,
        session_id: &str,
        frame: OutboundFrame,
    ) -> Result<EnqueueOutcome, GatewayError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::not_found("Session not found"))?;

        let outcome = entry.queue.enqueue(frame);
        if outcome == EnqueueOutcome::DroppedOldest {
            metrics::counter!("gateway_ws_frames_dropped_total").increment(1);
            debug!(session_id, "Outbound queue full, dropped oldest frame");
        }
        Ok(outcome)
    }

    /// Drain up to one batch from every connected session. Sessions with
    /// nothing pending are omitted; disconnected sessions keep their frames
    /// until they reattach.
    pub fn dispatch_round(&self) -> Vec<(String, Vec<OutboundFrame>)> {
        let mut sessions = self.sessions.lock();
        sessions
            .iter_mut()
            .filter(|(_, entry)| !entry.lifecycle.is_disconnected() && !entry.queue.is_empty())
            .map(|(id, entry)| (id.clone(), entry.queue.dequeue(self.dispatch_batch_size)))
            .collect()
    }

    /// Evict every session whose lifecycle clock has fired.
    pub fn run_reap_cycle(&self, now: Instant) -> ReapSummary {
        let expired: Vec<(String, WsSessionEntry, TerminationReason)> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<(String, TerminationReason)> = sessions
                .iter()
                .filter_map(|(id, entry)| {
                    entry
                        .lifecycle
                        .should_terminate(&self.limits, now)
                        .map(|reason| (id.clone(), reason))
                })
                .collect();
            ids.into_iter()
                .filter_map(|(id, reason)| sessions.remove(&id).map(|entry| (id, entry, reason)))
                .collect()
        };

        let mut summary = ReapSummary::default();
        for (session_id, entry, reason) in expired {
            entry.cancellation.cancel();
            self.concurrency.release(WS_NAMESPACE, &session_id);
            metrics::counter!("gateway_sessions_reaped_total", "reason" => reason.to_string()).increment(1);
            info!(session_id = %session_id, %reason, "Reaped WebSocket session");
            summary.reaped.push(ReapedSession { session_id, reason });
        }
        summary.total_reaped = summary.reaped.len();
        summary
    }

    pub fn touch(&self, session_id: &str, now: Instant) -> bool {
        self.with_lifecycle(session_id, |l| l.touch(now))
    }

    pub fn mark_disconnected(&self, session_id: &str, now: Instant) -> bool {
        self.with_lifecycle(session_id, |l| l.mark_disconnected(now))
    }

    pub fn mark_reattached(&self, session_id: &str, now: Instant) -> bool {
        self.with_lifecycle(session_id, |l| l.mark_reattached(now))
    }

    pub fn queue_stats(&self, session_id: &str) -> Option<QueueStats> {
        self.sessions.lock().get(session_id).map(|e| e.queue.stats())
    }

    pub fn is_backpressured(&self, session_id: &str) -> Option<bool> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|e| e.queue.is_backpressured())
    }

    pub fn pending(&self, session_id: &str) -> Option<usize> {
        self.sessions.lock().get(session_id).map(|e| e.queue.len())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    fn with_lifecycle(&self, session_id: &str, f: impl FnOnce(&mut SessionLifecycle)) -> bool {
        match self.sessions.lock().get_mut(session_id) {
            Some(entry) => {
                f(&mut entry.lifecycle);
                true
            }
            None => false,
        }
    }
}
