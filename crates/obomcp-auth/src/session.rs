//! Session construction
//!
//! Pure assembly of [`UserSession`] values from validated claims and a
//! mapped role. One fresh session id per request; the raw subject token is
//! retained in the claims bag so token exchange can read it back.

use std::collections::BTreeSet;

use uuid::Uuid;

use obomcp_core::session::{FrameworkRole, SUBJECT_TOKEN_CLAIM, UserSession};

use crate::claims::ValidatedClaims;

/// Builds per-request sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionBuilder;

impl SessionBuilder {
    /// Build a session for an accepted authentication
    pub fn build(claims: &ValidatedClaims, role: FrameworkRole, subject_token: &str) -> UserSession {
        Self::assemble(claims, role, claims.scopes.clone(), subject_token)
    }

    /// Build the safe-to-log session for a rejected authentication:
    /// Unassigned role, no scopes.
    pub fn build_rejected(claims: &ValidatedClaims, subject_token: &str) -> UserSession {
        Self::assemble(claims, FrameworkRole::Unassigned, BTreeSet::new(), subject_token)
    }

    fn assemble(
        claims: &ValidatedClaims,
        role: FrameworkRole,
        scopes: BTreeSet<String>,
        subject_token: &str,
    ) -> UserSession {
        let mut bag = claims.claims.clone();
        bag.insert(
            SUBJECT_TOKEN_CLAIM.to_string(),
            serde_json::Value::String(subject_token.to_string()),
        );

        UserSession {
            user_id: claims.user_id.clone(),
            username: claims.username.clone(),
            legacy_username: claims.legacy_username.clone(),
            role,
            custom_roles: claims.raw_roles.iter().cloned().collect(),
            scopes,
            claims: bag,
            session_id: Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validated() -> ValidatedClaims {
        ValidatedClaims {
            user_id: "u-1".to_string(),
            username: "alice".to_string(),
            legacy_username: Some("ALICE01".to_string()),
            raw_roles: vec!["user".to_string(), "developer".to_string()],
            scopes: BTreeSet::from(["read".to_string(), "write".to_string()]),
            claims: json!({"sub": "u-1"}).as_object().unwrap().clone(),
        }
    }

    #[test]
    fn builds_session_with_fresh_id() {
        let a = SessionBuilder::build(&validated(), FrameworkRole::User, "tok");
        let b = SessionBuilder::build(&validated(), FrameworkRole::User, "tok");
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.user_id, "u-1");
        assert_eq!(a.legacy_username.as_deref(), Some("ALICE01"));
        assert_eq!(a.subject_token(), Some("tok"));
    }

    #[test]
    fn custom_roles_keep_the_full_raw_set() {
        let session = SessionBuilder::build(&validated(), FrameworkRole::User, "tok");
        assert!(session.has_custom_role("user"));
        assert!(session.has_custom_role("developer"));
    }

    #[test]
    fn rejected_sessions_carry_no_access() {
        let session = SessionBuilder::build_rejected(&validated(), "tok");
        assert_eq!(session.role, FrameworkRole::Unassigned);
        assert!(session.scopes.is_empty());
        // Raw roles remain visible for audit.
        assert!(session.has_custom_role("developer"));
    }
}
