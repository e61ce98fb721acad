//! Primitive input sanitizers
//!
//! Small, deliberately strict checks applied to configuration values before
//! anything else consumes them. Everything here rejects rather than repairs.

use url::Url;

use crate::config::SigningAlgorithm;
use crate::error::{ConfigError, ConfigResult};

/// Maximum accepted identifier length
const MAX_IDENTIFIER_LEN: usize = 256;

/// Validate a logical identifier (IdP name, module name, secret name).
///
/// Accepts non-empty ASCII strings of letters, digits, `.`, `_`, `:` and `-`
/// up to 256 characters.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidIdentifier`] on empty, oversized, or
/// out-of-charset input.
pub fn validate_identifier(value: &str) -> ConfigResult<()> {
    let charset_ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN || !charset_ok {
        return Err(ConfigError::InvalidIdentifier {
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate that a URL parses and uses HTTPS.
///
/// HTTP is tolerated only for localhost, so tests can run against local mock
/// endpoints; everything else must be HTTPS.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUrl`] if the value does not parse or uses a
/// disallowed scheme.
pub fn validate_https_url(value: &str) -> ConfigResult<Url> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    let localhost = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    match url.scheme() {
        "https" => Ok(url),
        "http" if localhost => Ok(url),
        scheme => Err(ConfigError::InvalidUrl {
            value: value.to_string(),
            reason: format!("scheme \"{scheme}\" not allowed (HTTPS required)"),
        }),
    }
}

/// Validate a signing algorithm name against the RS256/ES256 allowlist.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAlgorithm`] for anything else, including
/// `none` and all symmetric algorithms.
pub fn validate_algorithm(value: &str) -> ConfigResult<SigningAlgorithm> {
    match value {
        "RS256" => Ok(SigningAlgorithm::Rs256),
        "ES256" => Ok(SigningAlgorithm::Es256),
        other => Err(ConfigError::InvalidAlgorithm {
            value: other.to_string(),
        }),
    }
}
