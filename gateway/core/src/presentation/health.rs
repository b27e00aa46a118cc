// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Liveness and readiness endpoints for the gateway process.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::application::context::GatewayContext;
use crate::infrastructure::services_client::{HealthReport, HealthStatus, VersionReport};

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    upstream: HealthReport,
    version: VersionReport,
    active_ws_sessions: usize,
}

pub fn router(ctx: Arc<GatewayContext>) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .with_state(ctx)
}

async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readiness(State(ctx): State<Arc<GatewayContext>>) -> impl IntoResponse {
    let upstream = ctx.services.check_health().await;
    let version = ctx.services.check_version().await;
    let ready = upstream.status != HealthStatus::Unhealthy && version.compatible;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            upstream,
            version,
            active_ws_sessions: ctx.ws_policy.session_count(),
        }),
    )
}
