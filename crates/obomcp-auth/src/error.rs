//! Authentication, cache, and exchange error types
//!
//! JWT validation errors never leak detail to callers: the transport-visible
//! `WWW-Authenticate` description is a short fixed phrase from
//! [`AuthError::www_authenticate`]; the full detail goes only to the audit
//! entry.

/// Result type for JWT validation
pub type AuthResult<T> = Result<T, AuthError>;

/// JWT validation failures
///
/// Every variant maps to a 401 at the transport. `Rejected` outcomes (valid
/// signature, negative policy) are not errors and travel through
/// [`obomcp_core::AuthDecision`] instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The token could not be parsed at all
    #[error("malformed token: {detail}")]
    InvalidToken {
        /// Parse-level detail (audit only)
        detail: String,
    },

    /// Signing algorithm outside the allowlist (includes `none`)
    #[error("token algorithm \"{alg}\" is not allowed")]
    InvalidAlgorithm {
        /// The offending `alg` header value
        alg: String,
    },

    /// No configured IdP matches the token's issuer and audience
    #[error("no trusted IdP named \"{name}\" matches issuer \"{issuer}\"")]
    UnknownIdp {
        /// Requested logical name
        name: String,
        /// Token issuer
        issuer: String,
    },

    /// More than one configured IdP matches; fatal configuration error
    #[error("{matches} IdP configs named \"{name}\" match issuer \"{issuer}\"; configuration is ambiguous")]
    AmbiguousIdp {
        /// Requested logical name
        name: String,
        /// Token issuer
        issuer: String,
        /// Number of matching configs
        matches: usize,
    },

    /// No JWKS key matches the token's `kid`, even after a forced refresh
    #[error("no JWKS key matches kid \"{kid}\"")]
    UnknownKey {
        /// The token's key id
        kid: String,
    },

    /// Signature verification failed
    #[error("token signature is invalid")]
    InvalidSignature,

    /// `exp` is in the past beyond the clock tolerance
    #[error("token is expired")]
    TokenExpired,

    /// `nbf` is in the future beyond the clock tolerance
    #[error("token is not yet valid")]
    TokenNotYetValid,

    /// `iat` is older than the configured maximum token age
    #[error("token is too old: issued {age_secs}s ago, maximum is {max_secs}s")]
    TokenTooOld {
        /// Seconds since `iat`
        age_secs: u64,
        /// Configured maximum
        max_secs: u64,
    },

    /// The configured audience is not in the token's `aud` set
    #[error("token audience does not match")]
    AudienceMismatch,

    /// The token's `iss` does not match the selected IdP
    #[error("token issuer does not match")]
    IssuerMismatch,

    /// A claim the configuration requires is missing
    #[error("required claim \"{claim}\" is missing")]
    MissingRequiredClaim {
        /// Claim name or mapped path
        claim: String,
    },

    /// JWKS could not be fetched or parsed
    #[error("JWKS unavailable for {jwks_uri}: {detail}")]
    Jwks {
        /// The endpoint that failed
        jwks_uri: String,
        /// Fetch/parse detail (audit only)
        detail: String,
    },
}

impl AuthError {
    /// Short stable tag for audit entries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidToken { .. } => "InvalidToken",
            Self::InvalidAlgorithm { .. } => "InvalidAlgorithm",
            Self::UnknownIdp { .. } => "UnknownIdp",
            Self::AmbiguousIdp { .. } => "AmbiguousIdp",
            Self::UnknownKey { .. } => "UnknownKey",
            Self::InvalidSignature => "InvalidSignature",
            Self::TokenExpired => "TokenExpired",
            Self::TokenNotYetValid => "TokenNotYetValid",
            Self::TokenTooOld { .. } => "TokenTooOld",
            Self::AudienceMismatch => "AudienceMismatch",
            Self::IssuerMismatch => "IssuerMismatch",
            Self::MissingRequiredClaim { .. } => "MissingRequiredClaim",
            Self::Jwks { .. } => "Jwks",
        }
    }

    /// The `(error, error_description)` pair for a `WWW-Authenticate: Bearer`
    /// challenge. Descriptions are fixed phrases; no internal detail leaks.
    pub fn www_authenticate(&self) -> (&'static str, &'static str) {
        match self {
            Self::TokenExpired => ("invalid_token", "token expired"),
            Self::AmbiguousIdp { .. } | Self::Jwks { .. } => {
                ("invalid_token", "token could not be validated")
            }
            _ => ("invalid_token", "token validation failed"),
        }
    }
}

/// Encrypted token cache failures
///
/// AAD mismatches and expiry are not errors - they surface as misses. These
/// variants cover genuinely broken states.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The cache was shut down and its root key zeroized
    #[error("token cache is closed")]
    Closed,

    /// AEAD encryption or key derivation failed
    #[error("token cache cryptography failed: {0}")]
    Crypto(String),
}

/// RFC 8693 token-exchange failures
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// The IdP rejected the exchange
    #[error("token exchange failed")]
    TokenExchangeFailed {
        /// HTTP status, when a response arrived
        status: Option<u16>,
        /// IdP `error` field, when present
        error: Option<String>,
        /// IdP `error_description` field, when present
        description: Option<String>,
    },

    /// Connection-level failure after the single retry
    #[error("token exchange transport failure: {0}")]
    Transport(String),

    /// The IdP returned something that is not a token response
    #[error("token exchange response invalid: {0}")]
    InvalidResponse(String),

    /// Neither the request nor the module config names an audience
    #[error("token exchange requires an audience")]
    MissingAudience,

    /// The session does not carry a subject token
    #[error("session has no subject token")]
    MissingSubjectToken,

    /// Cache-layer failure
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ExchangeError {
    /// Short stable tag for audit entries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenExchangeFailed { .. } => "TokenExchangeFailed",
            Self::Transport(_) => "Transport",
            Self::InvalidResponse(_) => "InvalidResponse",
            Self::MissingAudience => "MissingAudience",
            Self::MissingSubjectToken => "MissingSubjectToken",
            Self::Cache(_) => "Cache",
        }
    }
}
