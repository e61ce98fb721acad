//! Per-request session values
//!
//! A [`UserSession`] is built once per request from validated claims and
//! discarded when the request ends. It is passed by value into delegation
//! modules and must never be stored across requests.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known claims-bag key holding the raw subject token
///
/// Token exchange reads the subject token back out of the session through
/// this key.
pub const SUBJECT_TOKEN_CLAIM: &str = "obomcp:subject_token";

/// The engine's own role label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameworkRole {
    /// Full administrative access
    Admin,
    /// Regular authenticated user
    User,
    /// Minimal read-mostly access
    Guest,
    /// Sentinel for a session no mapping accepted; always rejected
    Unassigned,
    /// A custom role declared in an IdP's role mappings
    Custom(String),
}

impl FrameworkRole {
    /// Parse a configured role name
    pub fn parse(name: &str) -> Self {
        match name {
            "admin" => Self::Admin,
            "user" => Self::User,
            "guest" => Self::Guest,
            "Unassigned" => Self::Unassigned,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The configured name of this role
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Guest => "guest",
            Self::Unassigned => "Unassigned",
            Self::Custom(name) => name,
        }
    }

    /// Whether the role grants any access at all
    pub fn is_assigned(&self) -> bool {
        !matches!(self, Self::Unassigned)
    }
}

impl fmt::Display for FrameworkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FrameworkRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FrameworkRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Value type describing one authenticated request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    /// Stable user id from the IdP
    pub user_id: String,
    /// Display username
    pub username: String,
    /// Legacy account name, when the IdP maps one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_username: Option<String>,
    /// Mapped framework role
    pub role: FrameworkRole,
    /// Full raw role set from the token (never filtered by mapping)
    pub custom_roles: BTreeSet<String>,
    /// Raw scope strings from the token
    pub scopes: BTreeSet<String>,
    /// Opaque claims bag; holds the raw subject token under
    /// [`SUBJECT_TOKEN_CLAIM`]
    pub claims: serde_json::Map<String, serde_json::Value>,
    /// Ephemeral id correlating audit entries within one request
    pub session_id: String,
}

impl UserSession {
    /// The raw subject token this session was authenticated with
    pub fn subject_token(&self) -> Option<&str> {
        self.claims.get(SUBJECT_TOKEN_CLAIM).and_then(|v| v.as_str())
    }

    /// Whether the token carried the given scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Whether the token carried the given raw role
    pub fn has_custom_role(&self, role: &str) -> bool {
        self.custom_roles.contains(role)
    }
}

/// Outcome of authenticating a cryptographically valid token
///
/// `Rejected` is not an error: the signature verified but policy forbids
/// use. The rejected session carries the Unassigned role and no scopes so
/// the transport can log it without granting access. Validation failures
/// travel separately as errors.
#[derive(Debug, Clone)]
pub enum AuthDecision {
    /// Token accepted; use the session
    Authenticated {
        /// The per-request session
        session: UserSession,
    },
    /// Token valid but policy forbids use; respond 401/403
    Rejected {
        /// Safe-to-log session with the Unassigned role and no scopes
        session: UserSession,
        /// Policy reason
        reason: String,
    },
}

impl AuthDecision {
    /// The session regardless of outcome
    pub fn session(&self) -> &UserSession {
        match self {
            Self::Authenticated { session } | Self::Rejected { session, .. } => session,
        }
    }

    /// Whether the decision grants access
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_round_trips() {
        for name in ["admin", "user", "guest", "Unassigned", "auditor"] {
            assert_eq!(FrameworkRole::parse(name).as_str(), name);
        }
    }

    #[test]
    fn role_serde_uses_configured_names() {
        let json = serde_json::to_string(&FrameworkRole::Custom("auditor".to_string())).unwrap();
        assert_eq!(json, "\"auditor\"");
        let role: FrameworkRole = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, FrameworkRole::Admin);
    }

    #[test]
    fn unassigned_is_not_assigned() {
        assert!(!FrameworkRole::Unassigned.is_assigned());
        assert!(FrameworkRole::Guest.is_assigned());
    }

    #[test]
    fn subject_token_read_from_claims_bag() {
        let mut claims = serde_json::Map::new();
        claims.insert(
            SUBJECT_TOKEN_CLAIM.to_string(),
            serde_json::Value::String("raw.jwt.here".to_string()),
        );
        let session = UserSession {
            user_id: "u-1".to_string(),
            username: "alice".to_string(),
            legacy_username: None,
            role: FrameworkRole::User,
            custom_roles: BTreeSet::new(),
            scopes: BTreeSet::new(),
            claims,
            session_id: "s-1".to_string(),
        };
        assert_eq!(session.subject_token(), Some("raw.jwt.here"));
    }

    #[test]
    fn decision_accessors() {
        let session = UserSession {
            user_id: "u-1".to_string(),
            username: "alice".to_string(),
            legacy_username: None,
            role: FrameworkRole::Unassigned,
            custom_roles: BTreeSet::new(),
            scopes: BTreeSet::new(),
            claims: serde_json::Map::new(),
            session_id: "s-1".to_string(),
        };
        let rejected = AuthDecision::Rejected {
            session,
            reason: "unmapped roles: developer".to_string(),
        };
        assert!(!rejected.is_authenticated());
        assert_eq!(rejected.session().user_id, "u-1");
    }
}
