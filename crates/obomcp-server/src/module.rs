//! Delegation module interface
//!
//! A module is a plugin value implementing [`DelegationModule`], registered
//! with the registry at startup. Modules act against backend systems in the
//! authenticated user's name; the engine arranges credentials (via the
//! per-call [`DelegationCtx`]) and hands off.
//!
//! No globals: every call receives the context explicitly.

use std::sync::Arc;

use async_trait::async_trait;

use obomcp_auth::error::ExchangeError;
use obomcp_auth::exchange::ExchangeRequest;
use obomcp_core::audit::{AuditEntry, AuditSource};
use obomcp_core::config::{ModuleConfig, ResolvedTokenExchange};
use obomcp_core::session::UserSession;

use crate::context::CoreContext;
use crate::error::DelegationError;

/// Outcome of one delegated action
///
/// The audit trail is always present, success or not; the registry logs it
/// as the call's single terminal audit entry.
#[derive(Debug, Clone)]
pub struct DelegationResult {
    /// Whether the action succeeded
    pub success: bool,
    /// Backend payload on success
    pub data: Option<serde_json::Value>,
    /// Caller-visible error text on failure (generic; detail goes to audit)
    pub error: Option<String>,
    /// Failure envelope code, when failed
    pub code: Option<String>,
    /// The call's terminal audit entry
    pub audit_trail: AuditEntry,
}

impl DelegationResult {
    /// A successful result carrying backend data
    pub fn ok(module: &str, session: &UserSession, action: &str, data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            audit_trail: AuditEntry::success(
                AuditSource::Delegation(module.to_string()),
                action,
            )
            .with_user(&session.user_id)
            .with_session(&session.session_id),
        }
    }

    /// A failed result from a [`DelegationError`]
    pub fn failed(
        module: &str,
        session: &UserSession,
        action: &str,
        error: &DelegationError,
        detail: impl Into<String>,
    ) -> Self {
        let code = error.code();
        Self {
            success: false,
            data: None,
            error: Some(crate::error::public_message(code).to_string()),
            code: Some(code.to_string()),
            audit_trail: AuditEntry::failure(
                AuditSource::Delegation(module.to_string()),
                action,
            )
            .with_user(&session.user_id)
            .with_session(&session.session_id)
            .with_reason(code)
            .with_error(detail.into()),
        }
    }
}

/// Per-call context handed into a module
///
/// Carries the session id, the owning [`CoreContext`], and the module's
/// resolved token-exchange configuration so the module can obtain a
/// downstream credential without reaching for globals.
#[derive(Clone)]
pub struct DelegationCtx {
    /// Request-scoped session id
    pub session_id: String,
    /// The engine context (token exchange, audit, config)
    pub core: Arc<CoreContext>,
    /// This module's token-exchange configuration, when configured
    pub token_exchange: Option<Arc<ResolvedTokenExchange>>,
}

impl std::fmt::Debug for DelegationCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationCtx")
            .field("session_id", &self.session_id)
            .field("token_exchange", &self.token_exchange.is_some())
            .finish()
    }
}

impl DelegationCtx {
    /// Exchange the session's subject token for a downstream token using
    /// this module's exchange configuration.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::MissingSubjectToken`] when the session carries no
    /// subject token or the module has no exchange block; otherwise whatever
    /// the exchange service surfaces.
    pub async fn exchange_token(
        &self,
        session: &UserSession,
        audience: Option<&str>,
        scope: Option<&str>,
    ) -> Result<String, ExchangeError> {
        let config = self
            .token_exchange
            .as_deref()
            .ok_or(ExchangeError::MissingSubjectToken)?;
        let subject_token = session
            .subject_token()
            .ok_or(ExchangeError::MissingSubjectToken)?;

        self.core
            .token_exchange()
            .exchange(
                ExchangeRequest {
                    subject_token,
                    audience,
                    scope,
                    session_id: &self.session_id,
                },
                config,
            )
            .await
    }
}

/// A pluggable delegation backend
#[async_trait]
pub trait DelegationModule: Send + Sync {
    /// Unique registry key
    fn name(&self) -> &str;

    /// Informational implementation type (e.g. `sql`, `rest`)
    fn module_type(&self) -> &str;

    /// Apply configuration. Idempotent per instance.
    async fn initialize(&self, config: &ModuleConfig) -> Result<(), DelegationError>;

    /// Carry out an action in the session's name.
    ///
    /// The returned result's `audit_trail` becomes the call's terminal audit
    /// entry; modules must not log it to the sink themselves.
    async fn delegate(
        &self,
        session: &UserSession,
        action: &str,
        params: &serde_json::Value,
        ctx: &DelegationCtx,
    ) -> DelegationResult;

    /// Fast access precheck; the registry short-circuits on `false` without
    /// invoking the module.
    fn validate_access(&self, session: &UserSession) -> bool;

    /// Backend liveness, surfaced by the `health-check` tool
    async fn health_check(&self) -> bool;

    /// Release resources. Idempotent.
    async fn destroy(&self) -> Result<(), DelegationError>;
}
