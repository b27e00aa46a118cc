// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Supervisor
//!
//! Owns the gateway's periodic background loops. Each loop ticks on a
//! `tokio::time::interval` and exits when the shared cancellation token fires.
//!
//! - **dispatcher**: `WsLifecyclePolicy::dispatch_round` → [`FrameSink`]
//! - **reaper**: `WsLifecyclePolicy::run_reap_cycle`, exec session teardown
//!   for reaped sessions, rate-limit key purge

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::context::GatewayContext;
use crate::application::ws_lifecycle::{OutboundFrame, ReapSummary};
use crate::domain::lifecycle::TerminationReason;

/// Where dispatched frames go. Implemented by the WebSocket layer.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Hand `frames` to the writer for `session_id`. Returns `false` if the
    /// session has no live writer.
    async fn deliver(&self, session_id: &str, frames: Vec<OutboundFrame>) -> bool;

    /// The session was torn down by the lifecycle clock.
    async fn close(&self, _session_id: &str, _reason: TerminationReason) {}
}

/// Routes frames to per-session `mpsc` senders registered by WebSocket
/// handlers.
pub struct ChannelFrameSink {
    senders: Mutex<HashMap<String, mpsc::Sender<OutboundFrame>>>,
    buffer: usize,
}

impl ChannelFrameSink {
    pub fn new(buffer: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a writer for `session_id`, replacing any previous one.
    pub fn register(&self, session_id: &str) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.senders.lock().insert(session_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) -> bool {
        self.senders.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.lock().is_empty()
    }
}

#[async_trait]
impl FrameSink for ChannelFrameSink {
    async fn deliver(&self, session_id: &str, frames: Vec<OutboundFrame>) -> bool {
        let Some(tx) = self.senders.lock().get(session_id).cloned() else {
            return false;
        };

        for frame in frames {
            match tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!("gateway_ws_frames_dropped_total").increment(1);
                    debug!(session_id, "Writer channel full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.senders.lock().remove(session_id);
                    return false;
                }
            }
        }
        true
    }

    async fn close(&self, session_id: &str, _reason: TerminationReason) {
        self.unregister(session_id);
    }
}

pub struct Supervisor {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawn the dispatcher and reaper for `ctx` on the configured intervals.
    pub fn start(ctx: Arc<GatewayContext>, sink: Arc<dyn FrameSink>) -> Self {
        let websocket = &ctx.config.spec.websocket;
        let (dispatch_every, reap_every) = (websocket.dispatch_interval(), websocket.reap_interval());

        let mut supervisor = Self::new();
        supervisor.spawn_dispatcher(ctx.clone(), sink.clone(), dispatch_every);
        supervisor.spawn_reaper(ctx, sink, reap_every);
        supervisor
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn_dispatcher(&mut self, ctx: Arc<GatewayContext>, sink: Arc<dyn FrameSink>, every: Duration) {
        self.spawn_periodic("dispatcher", every, move || {
            let ctx = ctx.clone();
            let sink = sink.clone();
            async move {
                run_dispatch_tick(&ctx, sink.as_ref()).await;
            }
        });
    }

    pub fn spawn_reaper(&mut self, ctx: Arc<GatewayContext>, sink: Arc<dyn FrameSink>, every: Duration) {
        self.spawn_periodic("reaper", every, move || {
            let ctx = ctx.clone();
            let sink = sink.clone();
            async move {
                run_reap_tick(&ctx, sink.as_ref(), Instant::now()).await;
            }
        });
    }

    fn spawn_periodic<F, Fut>(&mut self, name: &'static str, every: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let every = every.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, interval_ms = every.as_millis() as u64, "Supervisor task started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }

            debug!(task = name, "Supervisor task stopped");
        });
        self.tasks.push((name, handle));
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Supervisor task ended abnormally");
            }
        }
        info!("Supervisor stopped");
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// One dispatcher tick. Returns the number of frames handed to the sink.
pub async fn run_dispatch_tick(ctx: &GatewayContext, sink: &dyn FrameSink) -> usize {
    let mut delivered = 0;
    for (session_id, frames) in ctx.ws_policy.dispatch_round() {
        let count = frames.len();
        if sink.deliver(&session_id, frames).await {
            delivered += count;
        } else {
            debug!(session_id = %session_id, dropped = count, "No writer for dispatched frames");
        }
    }
    delivered
}

/// One reaper tick.
pub async fn run_reap_tick(ctx: &GatewayContext, sink: &dyn FrameSink, now: Instant) -> ReapSummary {
    let summary = ctx.ws_policy.run_reap_cycle(now);
    for reaped in &summary.reaped {
        sink.close(&reaped.session_id, reaped.reason).await;
        if let Err(e) = ctx.exec_sessions.terminate_session(&reaped.session_id).await {
            warn!(session_id = %reaped.session_id, error = %e, "Exec teardown after reap failed");
        }
    }

    let purged = ctx.rate_limiter.purge_idle(now);
    if summary.total_reaped > 0 || purged > 0 {
        debug!(reaped = summary.total_reaped, purged_keys = purged, "Reap cycle complete");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_routes_and_detects_closed() {
        let sink = ChannelFrameSink::new(4);
        let mut rx = sink.register("s1");

        assert!(sink.deliver("s1", vec![OutboundFrame::Text("hi".into())]).await);
        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("hi".into())));
        assert!(!sink.deliver("other", vec![OutboundFrame::Text("x".into())]).await);

        drop(rx);
        assert!(!sink.deliver("s1", vec![OutboundFrame::Text("late".into())]).await);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let sink = ChannelFrameSink::new(1);
        let mut rx = sink.register("s1");
        let frames = vec![OutboundFrame::Text("a".into()), OutboundFrame::Text("b".into())];
        assert!(sink.deliver("s1", frames).await);
        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("a".into())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_supervisor_stops_on_shutdown() {
        let mut supervisor = Supervisor::new();
        let ticks = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = ticks.clone();
        supervisor.spawn_periodic("test", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let token = supervisor.cancellation_token();
        supervisor.shutdown().await;
        assert!(token.is_cancelled());
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }
}
