// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Exec Session Client
//!
//! Application service owning the lifecycle of sandbox command sessions.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Template lookup and policy, concurrency slots, remote
//!   create/delete, and the session registry
//! - **Collaborators:**
//!   - Domain: `ExecSession` aggregate, `ExecPolicy`, `ConcurrencyTracker`
//!   - Infrastructure: an [`ExecBackend`] (normally `ProxyExecBackend`)
//!
//! # Flow
//!
//! 1. Resolve the template and check it against the policy
//! 2. Acquire a slot in the `exec` concurrency namespace
//! 3. Create the session remotely; on failure release the slot
//! 4. Register the session as `running`
//!
//! Termination is idempotent and always cancels the session's background
//! tasks before the remote delete and before the slot is released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::exec_session::{
    ExecBackend, ExecPolicy, ExecSession, ExecSessionError, ExecSessionSummary, ExecTemplate,
};
use crate::domain::rate_limit::ConcurrencyTracker;

/// Concurrency namespace for exec sessions.
pub const EXEC_NAMESPACE: &str = "exec";

pub struct ExecSessionClient {
    backend: Arc<dyn ExecBackend>,
    templates: HashMap<String, ExecTemplate>,
    policy: ExecPolicy,
    concurrency: Arc<ConcurrencyTracker>,
    sessions: Mutex<HashMap<String, ExecSession>>,
}

impl ExecSessionClient {
    pub fn new(
        backend: Arc<dyn ExecBackend>,
        templates: impl IntoIterator<Item = ExecTemplate>,
        policy: ExecPolicy,
        concurrency: Arc<ConcurrencyTracker>,
    ) -> Self {
        Self {
            backend,
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
            policy,
            concurrency,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn create_session(&self, template_id: &str) -> Result<ExecSessionSummary, ExecSessionError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| ExecSessionError::TemplateNotFound(template_id.to_string()))?;
        self.policy.validate(template)?;

        let mut session = ExecSession::new(template_id);
        self.concurrency.acquire(EXEC_NAMESPACE, &session.id)?;

        let remote_id = match self.backend.create(&session.id, template).await {
            Ok(remote_id) => remote_id,
            Err(e) => {
                session.fail();
                self.concurrency.release(EXEC_NAMESPACE, &session.id);
                warn!(
                    session_id = %session.id,
                    template_id,
                    category = e.category().as_str(),
                    "Exec session create failed"
                );
                return Err(ExecSessionError::Backend(e));
            }
        };

        session.start(remote_id)?;
        let summary = session.summary();
        self.sessions.lock().insert(session.id.clone(), session);

        info!(session_id = %summary.id, template_id, "Exec session started");
        Ok(summary)
    }

    /// Terminate `session_id`. Unknown or already-terminated ids succeed with
    /// `false`.
    pub async fn terminate_session(&self, session_id: &str) -> Result<bool, ExecSessionError> {
        let Some(mut session) = self.sessions.lock().remove(session_id) else {
            return Ok(false);
        };

        session.terminate();

        if let Some(remote_id) = session.remote_id.as_deref() {
            if let Err(e) = self.backend.terminate(remote_id).await {
                warn!(
                    session_id,
                    category = e.category().as_str(),
                    "Remote exec session delete failed"
                );
            }
        }

        self.concurrency.release(EXEC_NAMESPACE, session_id);
        info!(session_id, "Exec session terminated");
        Ok(true)
    }

    pub fn attach_session(&self, session_id: &str) -> Result<ExecSessionSummary, ExecSessionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ExecSessionError::SessionNotFound(session_id.to_string()))?;
        session.attach()?;
        Ok(session.summary())
    }

    pub fn detach_session(&self, session_id: &str) -> Result<ExecSessionSummary, ExecSessionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ExecSessionError::SessionNotFound(session_id.to_string()))?;
        session.detach()?;
        Ok(session.summary())
    }

    /// Live sessions, oldest first.
    pub fn active_sessions(&self) -> Vec<ExecSessionSummary> {
        let sessions = self.sessions.lock();
        let mut live: Vec<&ExecSession> = sessions.values().filter(|s| s.state().is_live()).collect();
        live.sort_by_key(|s| s.created_at);
        live.into_iter().map(ExecSession::summary).collect()
    }

    pub fn get_session(&self, session_id: &str) -> Option<ExecSessionSummary> {
        self.sessions.lock().get(session_id).map(ExecSession::summary)
    }

    /// Token cancelled when `session_id` ends, for PTY bridges and output pumps.
    pub fn cancellation_token(&self, session_id: &str) -> Option<CancellationToken> {
        self.sessions
            .lock()
            .get(session_id)
            .map(ExecSession::cancellation_token)
    }

    /// Terminate every live session. Used on shutdown.
    pub async fn terminate_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        let mut terminated = 0;
        for id in ids {
            if matches!(self.terminate_session(&id).await, Ok(true)) {
                terminated += 1;
            }
        }
        terminated
    }
}
