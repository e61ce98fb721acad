//! # obomcp-auth
//!
//! Authentication and token plumbing for the obomcp on-behalf-of engine:
//!
//! - `jwks` - per-URI JWKS fetching with TTL caching, single-flight refresh,
//!   and rate-limited forced refresh on unknown key ids
//! - `claims` - dotted-path claim mapping into framework fields
//! - `validator` - the IdP-matching JWT validator (issuer+audience
//!   disambiguation across configs sharing a logical name)
//! - `roles` - per-IdP role mapping with the Unassigned-role policy
//! - `session` - per-request `UserSession` construction
//! - `service` - the `authenticate(token)` entry point the transport calls
//! - `token_cache` - AES-256-GCM encrypted cache for exchanged tokens,
//!   AAD-bound to the subject token
//! - `exchange` - RFC 8693 token-exchange client
//!
//! The engine validates tokens issued elsewhere; it never issues tokens,
//! runs authorization endpoints, or persists sessions across requests.

pub mod claims;
pub mod error;
pub mod exchange;
pub mod jwks;
pub mod roles;
pub mod service;
pub mod session;
pub mod token_cache;
pub mod validator;

#[doc(inline)]
pub use claims::ValidatedClaims;
#[doc(inline)]
pub use error::{AuthError, AuthResult, CacheError, ExchangeError};
#[doc(inline)]
pub use exchange::{ExchangeRequest, TokenExchangeService};
#[doc(inline)]
pub use jwks::{JwksClient, JwksStore};
#[doc(inline)]
pub use roles::{RoleDecision, map_role};
#[doc(inline)]
pub use service::{AuthenticationService, PreflightReport, extract_bearer};
#[doc(inline)]
pub use session::SessionBuilder;
#[doc(inline)]
pub use token_cache::{CachedToken, EncryptedTokenCache};
#[doc(inline)]
pub use validator::JwtValidator;
