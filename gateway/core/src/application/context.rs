// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway Context
//!
//! Every process-scoped singleton (replay store, rate limiter, concurrency
//! tracker, session registries, upstream clients, token codecs) built once
//! from a validated [`GatewayConfig`] and shared by `Arc` handle. Tests build a
//! fresh context per case.
//!
//! # Request path
//!
//! ```text
//! capability token ──► authorize ──► check_rate_limit ──► proxy / exec client
//! session token    ──► attach_realtime ──► WS registry + exec attach
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::exec_sessions::ExecSessionClient;
use crate::application::ws_lifecycle::WsLifecyclePolicy;
use crate::domain::error::{ErrorCategory, GatewayError};
use crate::domain::exec_session::{ExecBackend, ExecSessionSummary};
use crate::domain::gateway_config::{resolve_secret, GatewayConfig, SecretString};
use crate::domain::rate_limit::{ConcurrencyTracker, RateLimitScope, RateLimiter};
use crate::infrastructure::capability::{
    CapabilityClaims, CapabilityGuard, CapabilityTokenIssuer, CapabilityTokenValidator,
    JtiReplayStore, TokenUse,
};
use crate::infrastructure::exec_backend::ProxyExecBackend;
use crate::infrastructure::internal_auth::InternalAuthSigner;
use crate::infrastructure::proxy_client::GuardrailedProxyClient;
use crate::infrastructure::services_client::{ProxyHealthProbe, ServicesClient, UpstreamProbe};
use crate::infrastructure::session_token::{SessionTokenCodec, SessionTokenPayload};

/// Key material resolved from `env:` / `file:` references in the config.
#[derive(Debug, Clone)]
pub struct GatewaySecrets {
    pub capability_public_key: SecretString,
    pub capability_private_key: Option<SecretString>,
    pub session_secret: SecretString,
    pub internal_auth_secret: SecretString,
}

impl GatewaySecrets {
    pub fn resolve(config: &GatewayConfig) -> Result<Self> {
        let spec = &config.spec;
        let capability_private_key = spec
            .capability
            .private_key
            .as_deref()
            .map(resolve_secret)
            .transpose()
            .context("Failed to resolve capability private key")?;

        Ok(Self {
            capability_public_key: resolve_secret(&spec.capability.public_key)
                .context("Failed to resolve capability public key")?,
            capability_private_key,
            session_secret: resolve_secret(&spec.session_token.secret)
                .context("Failed to resolve session token secret")?,
            internal_auth_secret: resolve_secret(&spec.upstream.internal_auth_secret)
                .context("Failed to resolve internal auth secret")?,
        })
    }
}

/// A freshly created exec session and the session token bound to it.
#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub summary: ExecSessionSummary,
    pub session_token: String,
}

pub struct GatewayContext {
    pub config: Arc<GatewayConfig>,
    pub capability_issuer: Option<Arc<CapabilityTokenIssuer>>,
    pub capability_validator: Arc<CapabilityTokenValidator>,
    pub replay_store: Arc<JtiReplayStore>,
    pub capability_guard: Arc<CapabilityGuard>,
    pub session_tokens: Arc<SessionTokenCodec>,
    pub rate_limiter: Arc<RateLimiter>,
    pub concurrency: Arc<ConcurrencyTracker>,
    pub proxy: Arc<GuardrailedProxyClient>,
    pub services: Arc<ServicesClient>,
    pub exec_sessions: Arc<ExecSessionClient>,
    pub ws_policy: Arc<WsLifecyclePolicy>,
}

impl GatewayContext {
    /// Resolve secrets and build every collaborator against the real upstream.
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let secrets = GatewaySecrets::resolve(&config)?;
        GatewayContextBuilder::new(config, secrets).build()
    }

    pub fn builder(config: GatewayConfig, secrets: GatewaySecrets) -> GatewayContextBuilder {
        GatewayContextBuilder::new(config, secrets)
    }

    /// Validate `token` for `op`. Single-use tokens are consumed.
    pub fn authorize(&self, token: &str, op: &str, token_use: TokenUse) -> Result<CapabilityClaims, GatewayError> {
        self.capability_guard.authorize(token, op, token_use, Instant::now())
    }

    pub fn check_rate_limit(&self, scope: RateLimitScope, key: &str) -> Result<(), GatewayError> {
        self.rate_limiter
            .check(scope, key, Instant::now())
            .map_err(|e| GatewayError::rate_limited(e.retry_after_secs()))
    }

    /// Start an exec session and issue the session token the browser uses to
    /// attach to it.
    pub async fn open_exec_session(&self, template_id: &str) -> Result<OpenedSession, GatewayError> {
        let summary = self.exec_sessions.create_session(template_id).await?;

        match self.session_tokens.issue(&summary.id, &summary.template_id) {
            Ok(session_token) => Ok(OpenedSession {
                summary,
                session_token,
            }),
            Err(e) => {
                let _ = self.exec_sessions.terminate_session(&summary.id).await;
                Err(e.into())
            }
        }
    }

    /// Bind a real-time connection to the session named by `session_token`.
    /// Reconnecting within the reattach window resumes the same session.
    pub fn attach_realtime(&self, session_token: &str) -> Result<(SessionTokenPayload, CancellationToken), GatewayError> {
        let payload = self.session_tokens.validate(session_token)?;

        let session = self
            .exec_sessions
            .get_session(&payload.session_id)
            .filter(|s| s.status.is_live())
            .ok_or_else(|| GatewayError::not_found("Session not found"))?;

        let cancel = self.bind_realtime(&session.id)?;
        Ok((payload, cancel))
    }

    /// Register the WS side, then attach the exec session. The session may be
    /// terminated between lookup and attach; the registration is undone then.
    fn bind_realtime(&self, session_id: &str) -> Result<CancellationToken, GatewayError> {
        let cancel = self
            .ws_policy
            .register_session(session_id, Instant::now())
            .map_err(|_| GatewayError::new(ErrorCategory::RateLimit, "Too many concurrent sessions"))?;

        if let Err(e) = self.exec_sessions.attach_session(session_id) {
            let err = GatewayError::from(&e);
            if err.category() != ErrorCategory::Conflict {
                self.ws_policy.unregister_session(session_id);
                return Err(err);
            }
        }

        Ok(cancel)
    }

    /// The real-time connection dropped. The session stays alive for the
    /// reattach window.
    pub fn detach_realtime(&self, session_id: &str) {
        self.ws_policy.mark_disconnected(session_id, Instant::now());
        let _ = self.exec_sessions.detach_session(session_id);
    }

    /// Tear down the exec session and its real-time registration.
    pub async fn close_exec_session(&self, session_id: &str) -> Result<bool, GatewayError> {
        let unregistered = self.ws_policy.unregister_session(session_id);
        let terminated = self.exec_sessions.terminate_session(session_id).await?;
        Ok(unregistered || terminated)
    }

    /// Stop every live session. Called once on shutdown.
    pub async fn shutdown(&self) {
        for id in self.ws_policy.session_ids() {
            self.ws_policy.unregister_session(&id);
        }
        let terminated = self.exec_sessions.terminate_all().await;
        info!(terminated, "Gateway context shut down");
    }
}

/// Builds a [`GatewayContext`], optionally substituting the upstream probe or
/// exec backend.
pub struct GatewayContextBuilder {
    config: GatewayConfig,
    secrets: GatewaySecrets,
    probe: Option<Arc<dyn UpstreamProbe>>,
    exec_backend: Option<Arc<dyn ExecBackend>>,
}

impl GatewayContextBuilder {
    pub fn new(config: GatewayConfig, secrets: GatewaySecrets) -> Self {
        Self {
            config,
            secrets,
            probe: None,
            exec_backend: None,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn UpstreamProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_exec_backend(mut self, backend: Arc<dyn ExecBackend>) -> Self {
        self.exec_backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<GatewayContext> {
        let Self {
            config,
            secrets,
            probe,
            exec_backend,
        } = self;
        let spec = &config.spec;

        let capability_validator = Arc::new(
            CapabilityTokenValidator::new(
                secrets.capability_public_key.expose(),
                &spec.capability.issuer,
                &spec.capability.audience,
            )
            .context("Invalid capability public key")?,
        );
        let capability_issuer = secrets
            .capability_private_key
            .as_ref()
            .map(|key| {
                CapabilityTokenIssuer::new(key.expose(), &spec.capability.issuer, &spec.capability.audience)
                    .map(Arc::new)
            })
            .transpose()
            .context("Invalid capability private key")?;

        let replay_store = Arc::new(JtiReplayStore::new(
            spec.capability.replay_capacity,
            Duration::from_secs(spec.capability.replay_ttl_seconds),
        ));
        let capability_guard = Arc::new(CapabilityGuard::new(
            capability_validator.clone(),
            replay_store.clone(),
        ));

        let session_tokens = Arc::new(SessionTokenCodec::new(
            secrets.session_secret,
            Duration::from_secs(spec.session_token.ttl_seconds),
            spec.session_token.max_renewals,
        ));

        let rate_limiter = Arc::new(RateLimiter::new(&spec.rate_limits));
        let concurrency = Arc::new(ConcurrencyTracker::new(
            spec.session_limits.max_concurrent_sessions,
        ));

        let proxy = Arc::new(
            GuardrailedProxyClient::new(
                &spec.upstream,
                spec.guardrails.clone(),
                InternalAuthSigner::new(secrets.internal_auth_secret),
            )
            .context("Failed to build upstream proxy client")?,
        );

        let probe = probe
            .unwrap_or_else(|| Arc::new(ProxyHealthProbe::new(proxy.clone(), &spec.services)));
        let services = Arc::new(ServicesClient::new(
            probe,
            &spec.services,
            spec.upstream.max_retries,
            spec.upstream.backoff,
        ));

        let exec_backend = exec_backend.unwrap_or_else(|| Arc::new(ProxyExecBackend::new(proxy.clone())));
        let exec_sessions = Arc::new(ExecSessionClient::new(
            exec_backend,
            spec.exec.templates.clone(),
            spec.exec.policy,
            concurrency.clone(),
        ));

        let ws_policy = Arc::new(WsLifecyclePolicy::new(
            &spec.websocket,
            spec.session_limits.clone(),
            concurrency.clone(),
        ));

        info!(
            name = %config.metadata.name,
            upstream = %spec.upstream.host,
            templates = spec.exec.templates.len(),
            "Gateway context initialized"
        );

        Ok(GatewayContext {
            config: Arc::new(config),
            capability_issuer,
            capability_validator,
            replay_store,
            capability_guard,
            session_tokens,
            rate_limiter,
            concurrency,
            proxy,
            services,
            exec_sessions,
            ws_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::exec_session::{ExecSessionState, ExecTemplate};
    use crate::application::ws_lifecycle::WS_NAMESPACE;
    use crate::domain::rate_limit::WindowLimit;
    use crate::infrastructure::capability::test_keys::{PRIVATE_PEM, PUBLIC_PEM};
    use async_trait::async_trait;

    struct StubBackend;

    #[async_trait]
    impl ExecBackend for StubBackend {
        async fn create(&self, session_id: &str, _template: &ExecTemplate) -> Result<String, GatewayError> {
            Ok(format!("r-{session_id}"))
        }

        async fn terminate(&self, _remote_id: &str) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn secrets() -> GatewaySecrets {
        GatewaySecrets {
            capability_public_key: SecretString::new(PUBLIC_PEM),
            capability_private_key: Some(SecretString::new(PRIVATE_PEM)),
            session_secret: SecretString::new("session-secret-for-tests"),
            internal_auth_secret: SecretString::new("internal-secret-for-tests"),
        }
    }

    fn context() -> GatewayContext {
        let mut config = GatewayConfig::default();
        config.spec.exec.templates.push(ExecTemplate {
            id: "shell".to_string(),
            command: vec!["bash".to_string()],
            cwd: None,
            timeout_seconds: 60,
            max_output_bytes: 4096,
        });
        config.spec.rate_limits.api = WindowLimit {
            max_requests: 2,
            window_seconds: 60,
        };
        GatewayContext::builder(config, secrets())
            .with_exec_backend(Arc::new(StubBackend))
            .build()
            .unwrap()
    }

    #[test]
    fn test_authorize_single_use() {
        let ctx = context();
        let issuer = ctx.capability_issuer.clone().unwrap();
        let issued = issuer
            .issue_token("ws-1", ["files:read"], Duration::from_secs(60))
            .unwrap();

        assert!(ctx.authorize(&issued.token, "files:read", TokenUse::Reusable).is_ok());
        assert!(ctx.authorize(&issued.token, "files:write", TokenUse::Reusable).is_err());
        assert!(ctx.authorize(&issued.token, "files:read", TokenUse::SingleUse).is_ok());
        let err = ctx
            .authorize(&issued.token, "files:read", TokenUse::SingleUse)
            .unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn test_rate_limit_maps_to_429() {
        let ctx = context();
        ctx.check_rate_limit(RateLimitScope::Api, "ws-1").unwrap();
        ctx.check_rate_limit(RateLimitScope::Api, "ws-1").unwrap();
        let err = ctx.check_rate_limit(RateLimitScope::Api, "ws-1").unwrap_err();
        assert_eq!(err.http_status(), 429);
        assert!(err.retry_after().is_some());
        assert!(ctx.check_rate_limit(RateLimitScope::Api, "ws-2").is_ok());
    }

    #[tokio::test]
    async fn test_open_attach_detach_close() {
        let ctx = context();
        let opened = ctx.open_exec_session("shell").await.unwrap();

        let (payload, cancel) = ctx.attach_realtime(&opened.session_token).unwrap();
        assert_eq!(payload.session_id, opened.summary.id);
        assert_eq!(
            ctx.exec_sessions.get_session(&payload.session_id).unwrap().status,
            ExecSessionState::Attached
        );

        ctx.detach_realtime(&payload.session_id);
        let (_, again) = ctx.attach_realtime(&opened.session_token).unwrap();
        assert_eq!(ctx.ws_policy.session_count(), 1);

        assert!(ctx.close_exec_session(&payload.session_id).await.unwrap());
        assert!(cancel.is_cancelled());
        assert!(again.is_cancelled());
        assert!(!ctx.close_exec_session(&payload.session_id).await.unwrap());

        let err = ctx.attach_realtime(&opened.session_token).unwrap_err();
        assert_eq!(err.ws_close_code(), 4004);
    }

    #[test]
    fn test_failed_attach_releases_ws_slot() {
        let ctx = context();
        let err = ctx.bind_realtime("terminated-meanwhile").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(ctx.ws_policy.session_count(), 0);
        assert_eq!(ctx.concurrency.active(WS_NAMESPACE), 0);
    }

    #[test]
    fn test_attach_rejects_forged_token() {
        let ctx = context();
        let err = ctx.attach_realtime("a.b.c").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Auth);
    }
}
