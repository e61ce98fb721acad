//! Claim mapping
//!
//! Applies a per-IdP [`ClaimMappings`] to a verified claims payload,
//! producing the framework fields the rest of the engine works with. Paths
//! are dotted and descend into nested objects (`realm_access.roles`); a
//! mapping that points at a missing path leaves the field absent, which is
//! only an error for the user id.

use std::collections::BTreeSet;

use obomcp_core::config::ClaimMappings;

use crate::error::{AuthError, AuthResult};

/// Framework fields extracted from a verified token
#[derive(Debug, Clone)]
pub struct ValidatedClaims {
    /// Stable user id
    pub user_id: String,
    /// Display username (falls back to the user id)
    pub username: String,
    /// Legacy account name, when mapped and present
    pub legacy_username: Option<String>,
    /// Raw roles exactly as the token carried them
    pub raw_roles: Vec<String>,
    /// Scope set (string claims are split on ASCII whitespace)
    pub scopes: BTreeSet<String>,
    /// The full verified payload
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Follow a dotted path into a claims payload
pub fn lookup_path<'a>(claims: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(claims, |value, segment| value.get(segment))
}

/// Read a claim as a string set: either an array of strings or a single
/// whitespace-separated string. `"a b"` and `["a", "b"]` are equivalent.
fn string_set(value: &serde_json::Value) -> BTreeSet<String> {
    match value {
        serde_json::Value::String(s) => s.split_ascii_whitespace().map(str::to_string).collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Read a claim as a string list, preserving order. Accepts an array of
/// strings or a single string.
fn string_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Apply claim mappings to a verified payload.
///
/// # Errors
///
/// Returns [`AuthError::MissingRequiredClaim`] when the user-id path is
/// absent or not a string.
pub fn extract(
    payload: &serde_json::Map<String, serde_json::Value>,
    mappings: &ClaimMappings,
) -> AuthResult<ValidatedClaims> {
    let root = serde_json::Value::Object(payload.clone());

    let user_id = lookup_path(&root, &mappings.user_id)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AuthError::MissingRequiredClaim {
            claim: mappings.user_id.clone(),
        })?;

    let username = lookup_path(&root, &mappings.username)
        .and_then(|v| v.as_str())
        .map_or_else(|| user_id.clone(), str::to_string);

    let legacy_username = mappings
        .legacy_username
        .as_deref()
        .and_then(|path| lookup_path(&root, path))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let raw_roles = mappings
        .roles
        .as_deref()
        .and_then(|path| lookup_path(&root, path))
        .map(string_list)
        .unwrap_or_default();

    let scopes = mappings
        .scopes
        .as_deref()
        .and_then(|path| lookup_path(&root, path))
        .map(string_set)
        .unwrap_or_default();

    Ok(ValidatedClaims {
        user_id,
        username,
        legacy_username,
        raw_roles,
        scopes,
        claims: payload.clone(),
    })
}
