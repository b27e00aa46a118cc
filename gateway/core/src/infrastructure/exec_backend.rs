// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Exec backend over the guardrailed proxy.
//!
//! `POST /api/exec/sessions` starts a template; `DELETE
//! /api/exec/sessions/{id}` stops it. A 404 on delete means the backend has
//! already forgotten the session and counts as success.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::error::GatewayError;
use crate::domain::exec_session::{ExecBackend, ExecTemplate};
use crate::infrastructure::proxy_client::{GuardrailedProxyClient, ProxyRequest};

const SESSIONS_PATH: &str = "/api/exec/sessions";

#[derive(Debug, Serialize)]
struct CreateExecRequest<'a> {
    session_id: &'a str,
    template_id: &'a str,
    command: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a str>,
    timeout_seconds: u64,
    max_output_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct CreateExecResponse {
    id: String,
}

pub struct ProxyExecBackend {
    proxy: Arc<GuardrailedProxyClient>,
}

impl ProxyExecBackend {
    pub fn new(proxy: Arc<GuardrailedProxyClient>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl ExecBackend for ProxyExecBackend {
    async fn create(&self, session_id: &str, template: &ExecTemplate) -> Result<String, GatewayError> {
        let body = CreateExecRequest {
            session_id,
            template_id: &template.id,
            command: &template.command,
            cwd: template.cwd.as_deref(),
            timeout_seconds: template.timeout_seconds,
            max_output_bytes: template.max_output_bytes,
        };
        let response = self
            .proxy
            .request(ProxyRequest::post(SESSIONS_PATH).with_json(&body)?)
            .await?;

        if !response.is_success() {
            tracing::warn!(
                status = response.status_code,
                session_id,
                "Exec backend rejected session create"
            );
            return Err(GatewayError::provider_error());
        }

        let created: CreateExecResponse = response.json()?;
        if created.id.trim().is_empty() {
            return Err(GatewayError::provider_error());
        }
        Ok(created.id)
    }

    async fn terminate(&self, remote_id: &str) -> Result<(), GatewayError> {
        if remote_id.is_empty() || remote_id.contains(['/', '\\', '?', '#']) || remote_id == ".." {
            tracing::warn!("Refusing to terminate exec session with unsafe remote id");
            return Err(GatewayError::provider_error());
        }

        let path = format!("{}/{}", SESSIONS_PATH, remote_id);
        let response = self.proxy.request(ProxyRequest::delete(path)).await?;

        match response.status_code {
            200..=299 | 404 => Ok(()),
            status => {
                tracing::warn!(status, "Exec backend rejected session delete");
                Err(GatewayError::provider_error())
            }
        }
    }
}
