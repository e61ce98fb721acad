//! Configuration error types
//!
//! Everything in this enum is fatal at initialization: the process must not
//! begin serving with a configuration that fails validation or secret
//! resolution.

/// Result type for configuration loading and validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fatal configuration errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// No trusted IdP named `requestor-jwt` was configured
    #[error("no trusted IdP named \"requestor-jwt\" is configured; inbound requests cannot be authenticated")]
    MissingRequestorIdp,

    /// Two IdP configs collide on (name, issuer, audience)
    #[error("duplicate IdP config: name={name} issuer={issuer} audience={audience}")]
    DuplicateIdp {
        /// Logical IdP name
        name: String,
        /// Issuer URL
        issuer: String,
        /// Expected audience
        audience: String,
    },

    /// Two delegation modules share an instance name
    #[error("duplicate delegation module name: {name}")]
    DuplicateModule {
        /// Module instance name
        name: String,
    },

    /// Two tools share a name
    #[error("duplicate tool name: {name}")]
    DuplicateTool {
        /// Tool name
        name: String,
    },

    /// A `{"$secret": "NAME"}` descriptor could not be resolved
    #[error("secret \"{name}\" could not be resolved from the file store or environment")]
    UnresolvedSecret {
        /// Secret name (opaque; never the value)
        name: String,
    },

    /// Signing algorithm outside the RS256/ES256 allowlist
    #[error("signing algorithm \"{value}\" is not allowed (only RS256 and ES256 are supported)")]
    InvalidAlgorithm {
        /// The offending algorithm name
        value: String,
    },

    /// URL failed to parse or does not use HTTPS
    #[error("invalid URL \"{value}\": {reason}")]
    InvalidUrl {
        /// The offending URL
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Identifier failed the charset/length check
    #[error("invalid identifier \"{value}\"")]
    InvalidIdentifier {
        /// The offending identifier
        value: String,
    },

    /// A field that must hold a specific shape holds something else
    #[error("invalid configuration for {field}: {reason}")]
    InvalidField {
        /// Dotted path of the field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create an [`ConfigError::InvalidField`] error
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
