// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Browser-facing error rendering.
//!
//! HTTP: JSON `{error, category, retry_after?}` with the category's status
//! and a `Retry-After` header when set. WebSocket: a close code from the
//! reserved 4000-4999 range (1011 for unclassified failures) and the same
//! fixed message as the close reason.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::error::{ws_close, GatewayError};
use crate::domain::lifecycle::TerminationReason;
use crate::infrastructure::error_normalizer::normalize_error;

/// Close reasons are limited to 123 bytes by RFC 6455.
const MAX_CLOSE_REASON_BYTES: usize = 123;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.to_body())).into_response();
        if let Some(seconds) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

/// Handler error for anything that is not already a [`GatewayError`].
/// Normalized on the way out.
#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        normalize_error(&self.0).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: String,
}

impl WsCloseFrame {
    fn new(code: u16, reason: &str) -> Self {
        Self {
            code,
            reason: truncate_reason(reason),
        }
    }
}

impl From<&GatewayError> for WsCloseFrame {
    fn from(err: &GatewayError) -> Self {
        Self::new(err.ws_close_code(), err.message())
    }
}

/// Close frame for a session torn down by its lifecycle clock.
pub fn close_for_termination(reason: TerminationReason) -> WsCloseFrame {
    let text = match reason {
        TerminationReason::AbsoluteTimeout => "Session reached its maximum lifetime",
        TerminationReason::IdleTimeout => "Session idle for too long",
        TerminationReason::ReattachTimeout => "Session was not resumed in time",
    };
    WsCloseFrame::new(ws_close::SESSION_TERMINATED, text)
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
