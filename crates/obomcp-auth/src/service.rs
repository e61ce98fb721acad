//! Authentication service
//!
//! The single entry point the transport calls per request. Composes the
//! JWT validator, the role mapper, and the session builder; emits exactly
//! one terminal audit entry per call, whose `success` matches the outcome.

use std::sync::Arc;

use tracing::warn;

use obomcp_core::audit::{AuditEntry, AuditSink, AuditSource};
use obomcp_core::config::REQUESTOR_IDP;
use obomcp_core::session::{AuthDecision, FrameworkRole};

use crate::error::AuthResult;
use crate::roles::{RoleDecision, map_role};
use crate::session::SessionBuilder;
use crate::validator::JwtValidator;

/// Extract a bearer token from an `Authorization` header value.
///
/// The scheme comparison is case-insensitive; surrounding whitespace is
/// trimmed. Returns `None` for other schemes.
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    let trimmed = header_value.trim();
    let (scheme, rest) = trimmed.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        let token = rest.trim();
        (!token.is_empty()).then_some(token)
    } else {
        None
    }
}

/// JWKS preflight outcome for startup
#[derive(Debug, Default)]
pub struct PreflightReport {
    /// Endpoints that could not be fetched, with the failure detail
    pub unreachable: Vec<(String, String)>,
}

impl PreflightReport {
    /// Whether every configured endpoint answered
    pub fn all_reachable(&self) -> bool {
        self.unreachable.is_empty()
    }
}

/// The authentication entry point
pub struct AuthenticationService {
    validator: Arc<JwtValidator>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AuthenticationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationService")
            .field("validator", &self.validator)
            .finish()
    }
}

impl AuthenticationService {
    /// Create the service over a validator and the audit sink
    pub fn new(validator: Arc<JwtValidator>, audit: Arc<dyn AuditSink>) -> Self {
        Self { validator, audit }
    }

    /// The validator this service runs
    pub fn validator(&self) -> &Arc<JwtValidator> {
        &self.validator
    }

    /// Authenticate a bearer token against the named identity context
    /// (default `requestor-jwt`).
    ///
    /// `Ok(Rejected)` means the signature verified but policy forbids use;
    /// the carried session holds the Unassigned role and no scopes.
    ///
    /// # Errors
    ///
    /// Validation failures as [`crate::error::AuthError`]; the transport
    /// answers 401 with the fixed phrase from
    /// [`crate::error::AuthError::www_authenticate`].
    pub async fn authenticate(
        &self,
        token: &str,
        idp_name: Option<&str>,
    ) -> AuthResult<AuthDecision> {
        let idp_name = idp_name.unwrap_or(REQUESTOR_IDP);

        let (claims, idp) = match self.validator.validate(token, idp_name).await {
            Ok(validated) => validated,
            Err(e) => {
                self.audit.log(
                    AuditEntry::failure(AuditSource::Jwt, "authenticate")
                        .with_resource(idp_name)
                        .with_reason(e.kind())
                        .with_error(e.to_string()),
                );
                return Err(e);
            }
        };

        match map_role(&claims.raw_roles, &idp.role_mappings) {
            RoleDecision::Assigned(role) if role.is_assigned() => {
                let session = SessionBuilder::build(&claims, role, token);
                self.audit.log(
                    AuditEntry::success(AuditSource::Service, "authenticate")
                        .with_user(&session.user_id)
                        .with_session(&session.session_id)
                        .with_resource(idp_name),
                );
                Ok(AuthDecision::Authenticated { session })
            }
            decision => {
                let reason = match decision {
                    RoleDecision::Rejected { reason } => reason,
                    RoleDecision::Assigned(_) => "no role mapping matched".to_string(),
                };
                let session = SessionBuilder::build_rejected(&claims, token);
                debug_assert_eq!(session.role, FrameworkRole::Unassigned);
                self.audit.log(
                    AuditEntry::failure(AuditSource::Service, "authenticate")
                        .with_user(&session.user_id)
                        .with_session(&session.session_id)
                        .with_resource(idp_name)
                        .with_reason(&reason),
                );
                Ok(AuthDecision::Rejected { session, reason })
            }
        }
    }

    /// Preflight-fetch JWKS for every configured IdP.
    ///
    /// An unreachable endpoint is a warning, never fatal: its first live
    /// validation will retry the fetch.
    pub async fn initialize(&self) -> PreflightReport {
        let mut report = PreflightReport::default();
        for (jwks_uri, error) in self.validator.preflight().await {
            warn!(
                jwks_uri = %jwks_uri,
                error = %error,
                "JWKS preflight failed; first live validation will retry"
            );
            report.unreachable.push((jwks_uri, error.to_string()));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(extract_bearer("bearer tok"), Some("tok"));
        assert_eq!(extract_bearer("BEARER tok"), Some("tok"));
        assert_eq!(extract_bearer("  Bearer   tok  "), Some("tok"));
        assert_eq!(extract_bearer("Basic dXNlcjpwdw=="), None);
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("token-without-scheme"), None);
    }
}
