// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Exec Session Aggregate
//!
//! A command session running inside the sandbox backend. The aggregate only
//! enforces legal state transitions; the application-layer client drives it and
//! talks to the remote side through [`ExecBackend`].
//!
//! ```text
//! Created ──► Running ──► Attached ⇄ Detached
//!    │           │            │          │
//!    └───────────┴────────────┴──────────┴──► Terminated
//!    └──► Error (remote create failed)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::error::{ErrorCategory, GatewayError};
use crate::domain::rate_limit::ConcurrencyLimitExceeded;

/// Characters that carry meaning to a shell. Templates are executed as argv,
/// so none of these may appear in any element.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '<', '>', '(', ')', '{', '}', '\n', '\r', '\0',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecSessionState {
    Created,
    Running,
    Attached,
    Detached,
    Terminated,
    Error,
}

impl ExecSessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Attached => "attached",
            Self::Detached => "detached",
            Self::Terminated => "terminated",
            Self::Error => "error",
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Terminated | Self::Error)
    }
}

impl fmt::Display for ExecSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre-approved command the browser may start by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTemplate {
    pub id: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub timeout_seconds: u64,
    pub max_output_bytes: u64,
}

/// Upper bounds every registered template must respect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecPolicy {
    pub max_timeout_seconds: u64,
    pub max_output_bytes: u64,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            max_timeout_seconds: 3600,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ExecPolicy {
    pub fn validate(&self, template: &ExecTemplate) -> Result<(), ExecSessionError> {
        let violation = |reason: &str| {
            Err(ExecSessionError::PolicyViolation {
                template_id: template.id.clone(),
                reason: reason.to_string(),
            })
        };

        if template.command.is_empty() || template.command[0].trim().is_empty() {
            return violation("command is empty");
        }
        if template
            .command
            .iter()
            .any(|arg| arg.contains(SHELL_METACHARACTERS))
        {
            return violation("command contains shell metacharacters");
        }
        if let Some(cwd) = &template.cwd {
            if cwd.contains(SHELL_METACHARACTERS) || cwd.split(['/', '\\']).any(|s| s == "..") {
                return violation("cwd is not permitted");
            }
        }
        if template.timeout_seconds == 0 || template.timeout_seconds > self.max_timeout_seconds {
            return violation("timeout out of range");
        }
        if template.max_output_bytes == 0 || template.max_output_bytes > self.max_output_bytes {
            return violation("output limit out of range");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExecSession {
    pub id: String,
    pub template_id: String,
    state: ExecSessionState,
    pub created_at: DateTime<Utc>,
    pub attached_at: Option<DateTime<Utc>>,
    pub detached_at: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
    cancellation: CancellationToken,
}

impl ExecSession {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            template_id: template_id.into(),
            state: ExecSessionState::Created,
            created_at: Utc::now(),
            attached_at: None,
            detached_at: None,
            remote_id: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ExecSessionState {
        self.state
    }

    /// Token cancelled when the session ends. Background tasks (output pumps,
    /// PTY bridges) should select on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn start(&mut self, remote_id: impl Into<String>) -> Result<(), ExecSessionError> {
        self.transition(&[ExecSessionState::Created], ExecSessionState::Running)?;
        self.remote_id = Some(remote_id.into());
        Ok(())
    }

    pub fn attach(&mut self) -> Result<(), ExecSessionError> {
        self.transition(
            &[ExecSessionState::Running, ExecSessionState::Detached],
            ExecSessionState::Attached,
        )?;
        self.attached_at = Some(Utc::now());
        Ok(())
    }

    pub fn detach(&mut self) -> Result<(), ExecSessionError> {
        self.transition(
            &[ExecSessionState::Attached, ExecSessionState::Running],
            ExecSessionState::Detached,
        )?;
        self.detached_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self) {
        self.cancellation.cancel();
        self.state = ExecSessionState::Error;
    }

    /// Cancels background work and marks the session terminated. Returns
    /// `false` if it was already finished.
    pub fn terminate(&mut self) -> bool {
        if !self.state.is_live() {
            return false;
        }
        self.cancellation.cancel();
        self.state = ExecSessionState::Terminated;
        true
    }

    pub fn summary(&self) -> ExecSessionSummary {
        ExecSessionSummary {
            id: self.id.clone(),
            template_id: self.template_id.clone(),
            status: self.state,
        }
    }

    fn transition(
        &mut self,
        from: &[ExecSessionState],
        to: ExecSessionState,
    ) -> Result<(), ExecSessionError> {
        if !from.contains(&self.state) {
            return Err(ExecSessionError::InvalidTransition {
                session_id: self.id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSessionSummary {
    pub id: String,
    pub template_id: String,
    pub status: ExecSessionState,
}

#[derive(Debug, Error)]
pub enum ExecSessionError {
    #[error("Exec template not found: {0}")]
    TemplateNotFound(String),

    #[error("Exec template {template_id} violates policy: {reason}")]
    PolicyViolation { template_id: String, reason: String },

    #[error("Exec session not found: {0}")]
    SessionNotFound(String),

    #[error("Exec session {session_id} cannot move from {from} to {to}")]
    InvalidTransition {
        session_id: String,
        from: ExecSessionState,
        to: ExecSessionState,
    },

    #[error(transparent)]
    ConcurrencyLimit(#[from] ConcurrencyLimitExceeded),

    #[error("Exec backend failure: {0}")]
    Backend(#[from] GatewayError),
}

impl From<ExecSessionError> for GatewayError {
    fn from(err: ExecSessionError) -> Self {
        match err {
            ExecSessionError::Backend(inner) => inner,
            other => (&other).into(),
        }
    }
}

impl From<&ExecSessionError> for GatewayError {
    fn from(err: &ExecSessionError) -> Self {
        match err {
            ExecSessionError::TemplateNotFound(_) => GatewayError::not_found("Exec template not found"),
            ExecSessionError::PolicyViolation { .. } => {
                GatewayError::validation("Exec template is not permitted")
            }
            ExecSessionError::SessionNotFound(_) => GatewayError::not_found("Exec session not found"),
            ExecSessionError::InvalidTransition { .. } => {
                GatewayError::conflict("Exec session is not in a valid state for this operation")
            }
            ExecSessionError::ConcurrencyLimit(_) => {
                GatewayError::new(ErrorCategory::RateLimit, "Too many concurrent exec sessions")
            }
            ExecSessionError::Backend(inner) => inner.clone(),
        }
    }
}

/// The sandbox side of exec sessions.
#[async_trait]
pub trait ExecBackend: Send + Sync {
    /// Start `template` remotely for local session `session_id`. Returns the
    /// backend's id for the session.
    async fn create(&self, session_id: &str, template: &ExecTemplate) -> Result<String, GatewayError>;

    async fn terminate(&self, remote_id: &str) -> Result<(), GatewayError>;
}
