//! Transport-facing protected-resource data
//!
//! The engine does not serve HTTP, but it owns the data the transport needs:
//! the RFC 9728 protected-resource metadata document advertising trusted
//! issuers, and the `WWW-Authenticate` challenge for 401 responses. The
//! challenge's `error_description` is always a short fixed phrase; detail
//! stays in the audit trail.

use serde::Serialize;

use obomcp_auth::error::AuthError;
use obomcp_core::config::EngineConfig;

/// RFC 9728 protected-resource metadata, served by the transport at
/// `/.well-known/oauth-protected-resource`
#[derive(Debug, Clone, Serialize)]
pub struct ResourceMetadata {
    /// Resource server identifier
    pub resource: String,
    /// Trusted authorization servers (the configured IdP issuers)
    pub authorization_servers: Vec<String>,
    /// Bearer delivery methods the transport accepts
    pub bearer_methods_supported: Vec<String>,
    /// Scopes this resource understands, when advertised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

impl ResourceMetadata {
    /// Build the metadata document from configuration
    pub fn from_config(resource: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers: config
                .trusted_issuers()
                .into_iter()
                .map(str::to_string)
                .collect(),
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: None,
        }
    }
}

/// Build a `WWW-Authenticate: Bearer` challenge value for a 401 response.
pub fn www_authenticate(realm: &str, error: Option<&AuthError>) -> String {
    match error {
        Some(error) => {
            let (code, description) = error.www_authenticate();
            format!("Bearer realm=\"{realm}\", error=\"{code}\", error_description=\"{description}\"")
        }
        None => format!("Bearer realm=\"{realm}\""),
    }
}
