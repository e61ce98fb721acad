//! Per-IdP role mapping
//!
//! Maps the raw roles a token carries onto one framework role. Declared
//! priority order is admin, user, guest, then custom roles in config order;
//! the first framework role with a matching raw role wins.
//!
//! The mapper never fails. When nothing matches it applies the IdP's policy:
//! reject (when `rejectUnmappedRoles` is set), fall back to `defaultRole`,
//! or - with no fallback configured - return the Unassigned sentinel, which
//! the authentication service turns into a `Rejected` decision.

use obomcp_core::config::RoleMappings;
use obomcp_core::session::FrameworkRole;

/// Outcome of role mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleDecision {
    /// A framework role was selected (possibly Unassigned)
    Assigned(FrameworkRole),
    /// Policy rejects the unmapped raw roles outright
    Rejected {
        /// Human-readable policy reason
        reason: String,
    },
}

/// Map raw token roles onto a framework role.
///
/// Infallible by design: every input lands in a declared framework role, the
/// configured default, the Unassigned sentinel, or an explicit rejection.
pub fn map_role(raw_roles: &[String], mappings: &RoleMappings) -> RoleDecision {
    let matches = |configured: &std::collections::BTreeSet<String>| {
        raw_roles.iter().any(|raw| configured.contains(raw))
    };

    if matches(&mappings.admin) {
        return RoleDecision::Assigned(FrameworkRole::Admin);
    }
    if matches(&mappings.user) {
        return RoleDecision::Assigned(FrameworkRole::User);
    }
    if matches(&mappings.guest) {
        return RoleDecision::Assigned(FrameworkRole::Guest);
    }
    for (role, configured) in mappings.custom_roles() {
        if raw_roles.iter().any(|raw| configured.contains(raw.as_str())) {
            return RoleDecision::Assigned(FrameworkRole::parse(role));
        }
    }

    if mappings.reject_unmapped_roles {
        let listed = if raw_roles.is_empty() {
            "<none>".to_string()
        } else {
            raw_roles.join(", ")
        };
        return RoleDecision::Rejected {
            reason: format!("unmapped roles: {listed}"),
        };
    }

    match mappings.default_role.as_deref() {
        Some(name) => RoleDecision::Assigned(FrameworkRole::parse(name)),
        None => RoleDecision::Assigned(FrameworkRole::Unassigned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mappings(value: serde_json::Value) -> RoleMappings {
        serde_json::from_value(value).unwrap()
    }

    fn raw(roles: &[&str]) -> Vec<String> {
        roles.iter().map(|r| (*r).to_string()).collect()
    }

    #[test]
    fn first_match_wins_in_priority_order() {
        let m = mappings(json!({
            "admin": ["superuser"],
            "user": ["staff", "superuser"],
        }));
        assert_eq!(
            map_role(&raw(&["superuser"]), &m),
            RoleDecision::Assigned(FrameworkRole::Admin)
        );
        assert_eq!(
            map_role(&raw(&["staff"]), &m),
            RoleDecision::Assigned(FrameworkRole::User)
        );
    }

    #[test]
    fn custom_roles_follow_builtins_in_config_order() {
        let m = mappings(json!({
            "user": ["staff"],
            "auditor": ["log-reader"],
            "operator": ["log-reader", "ops"],
        }));
        // auditor comes first in config order, so log-reader maps there.
        assert_eq!(
            map_role(&raw(&["log-reader"]), &m),
            RoleDecision::Assigned(FrameworkRole::Custom("auditor".to_string()))
        );
        assert_eq!(
            map_role(&raw(&["ops"]), &m),
            RoleDecision::Assigned(FrameworkRole::Custom("operator".to_string()))
        );
    }

    #[test]
    fn unmapped_falls_back_to_default_role() {
        let m = mappings(json!({
            "admin": ["admin"],
            "user": ["user"],
            "defaultRole": "guest",
        }));
        assert_eq!(
            map_role(&raw(&["developer"]), &m),
            RoleDecision::Assigned(FrameworkRole::Guest)
        );
    }

    #[test]
    fn reject_unmapped_when_policy_says_so() {
        let m = mappings(json!({
            "user": ["user"],
            "defaultRole": "guest",
            "rejectUnmappedRoles": true,
        }));
        match map_role(&raw(&["developer"]), &m) {
            RoleDecision::Rejected { reason } => {
                assert_eq!(reason, "unmapped roles: developer");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn no_default_yields_unassigned() {
        let m = mappings(json!({"user": ["user"]}));
        assert_eq!(
            map_role(&raw(&["developer"]), &m),
            RoleDecision::Assigned(FrameworkRole::Unassigned)
        );
    }

    #[test]
    fn empty_raw_roles_follow_the_same_policy() {
        let lenient = mappings(json!({"defaultRole": "guest"}));
        assert_eq!(
            map_role(&[], &lenient),
            RoleDecision::Assigned(FrameworkRole::Guest)
        );

        let strict = mappings(json!({"rejectUnmappedRoles": true}));
        assert!(matches!(map_role(&[], &strict), RoleDecision::Rejected { .. }));
    }

    #[test]
    fn identity_mapping_is_idempotent() {
        let m = mappings(json!({
            "admin": ["admin"],
            "user": ["user"],
            "guest": ["guest"],
        }));
        for role in [FrameworkRole::Admin, FrameworkRole::User, FrameworkRole::Guest] {
            let decision = map_role(&raw(&[role.as_str()]), &m);
            assert_eq!(decision, RoleDecision::Assigned(role));
        }
    }
}
