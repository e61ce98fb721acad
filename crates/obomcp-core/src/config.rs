//! Engine configuration model
//!
//! One document with two sections the engine consumes: `auth` (trusted IdPs
//! plus audit policy) and `delegation` (module instances). The hosting
//! transport owns its own `mcp` section and never hands it to the engine.
//!
//! All records are immutable after [`EngineConfig::validate`] passes; the
//! process must not begin serving if it fails.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::audit::AuditConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::secrets::{SecretResolver, SecretValue};
use crate::validation::{validate_https_url, validate_identifier};

/// Logical IdP name reserved for authenticating inbound requests
pub const REQUESTOR_IDP: &str = "requestor-jwt";

/// Signing algorithms the engine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    #[serde(rename = "RS256")]
    Rs256,
    /// ECDSA P-256 with SHA-256
    #[serde(rename = "ES256")]
    Es256,
}

impl SigningAlgorithm {
    /// The JOSE `alg` header value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Es256 => "ES256",
        }
    }
}

/// Top-level configuration document
///
/// The engine consumes `auth` and `delegation`; `mcp` belongs to the
/// hosting transport and is carried opaquely. Anything else - including the
/// legacy global token-exchange block - is rejected at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Authentication section
    pub auth: AuthSection,
    /// Delegation section
    #[serde(default)]
    pub delegation: DelegationConfig,
    /// Transport section, never read by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<serde_json::Value>,
}

/// The `auth` configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    /// Ordered list of trusted IdP configurations
    #[serde(rename = "trustedIDPs")]
    pub trusted_idps: Vec<TrustedIdp>,
    /// Audit policy
    #[serde(default)]
    pub audit: AuditConfig,
}

/// One trusted IdP configuration
///
/// Several records may share a logical `name`; the validator disambiguates
/// by (`issuer`, `audience`), and (`name`, `issuer`, `audience`) is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrustedIdp {
    /// Logical name the transport selects an identity context by
    pub name: String,
    /// Expected `iss` claim
    pub issuer: String,
    /// Expected audience (must be a member of the token `aud` set)
    pub audience: String,
    /// JWKS endpoint
    pub jwks_uri: String,
    /// Allowed signing algorithms
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<SigningAlgorithm>,
    /// Framework field to claim-path mapping
    #[serde(default)]
    pub claim_mappings: ClaimMappings,
    /// Raw-role to framework-role mapping
    #[serde(default)]
    pub role_mappings: RoleMappings,
    /// Clock skew tolerance in seconds for exp/nbf checks
    #[serde(default = "default_clock_tolerance")]
    pub clock_tolerance_secs: u64,
    /// Maximum accepted token age in seconds (from `iat`)
    #[serde(default = "default_max_token_age")]
    pub max_token_age_secs: u64,
    /// Whether a missing `nbf` claim is a validation failure
    #[serde(default)]
    pub require_nbf: bool,
    /// Token-exchange defaults for tokens validated against this IdP
    #[serde(default)]
    pub token_exchange: Option<TokenExchangeConfig>,
}

fn default_algorithms() -> Vec<SigningAlgorithm> {
    vec![SigningAlgorithm::Rs256, SigningAlgorithm::Es256]
}

fn default_clock_tolerance() -> u64 {
    60
}

fn default_max_token_age() -> u64 {
    86_400
}

impl TrustedIdp {
    /// Clock tolerance as a [`Duration`]
    pub fn clock_tolerance(&self) -> Duration {
        Duration::from_secs(self.clock_tolerance_secs)
    }

    /// Maximum token age as a [`Duration`]
    pub fn max_token_age(&self) -> Duration {
        Duration::from_secs(self.max_token_age_secs)
    }
}

/// Framework field to JWT claim-path mapping
///
/// Paths are dotted and descend into nested objects, e.g.
/// `realm_access.roles`. A mapping that points at a missing path leaves the
/// field absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClaimMappings {
    /// Claim path of the stable user id
    #[serde(default = "default_user_id_claim")]
    pub user_id: String,
    /// Claim path of the display username
    #[serde(default = "default_username_claim")]
    pub username: String,
    /// Claim path of a legacy account name, when the backend needs one
    #[serde(default)]
    pub legacy_username: Option<String>,
    /// Claim path of the raw roles list
    #[serde(default)]
    pub roles: Option<String>,
    /// Claim path of the scopes (string or array form)
    #[serde(default = "default_scopes_claim")]
    pub scopes: Option<String>,
}

fn default_user_id_claim() -> String {
    "sub".to_string()
}

fn default_username_claim() -> String {
    "preferred_username".to_string()
}

fn default_scopes_claim() -> Option<String> {
    Some("scope".to_string())
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            user_id: default_user_id_claim(),
            username: default_username_claim(),
            legacy_username: None,
            roles: None,
            scopes: default_scopes_claim(),
        }
    }
}

/// Per-IdP raw-role to framework-role mapping
///
/// Keys other than the three built-in roles and the two policy knobs are
/// custom framework roles; their document order is the priority order after
/// the built-ins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMappings {
    /// Raw roles that map to the admin framework role
    #[serde(default)]
    pub admin: BTreeSet<String>,
    /// Raw roles that map to the user framework role
    #[serde(default)]
    pub user: BTreeSet<String>,
    /// Raw roles that map to the guest framework role
    #[serde(default)]
    pub guest: BTreeSet<String>,
    /// Fallback framework role when nothing matches
    #[serde(default)]
    pub default_role: Option<String>,
    /// Whether unmapped raw roles reject the session instead of falling back
    #[serde(default)]
    pub reject_unmapped_roles: bool,
    /// Custom framework roles, in document order
    #[serde(flatten)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl RoleMappings {
    /// Custom framework roles with their raw-role sets, in document order.
    ///
    /// Non-array values are skipped; [`EngineConfig::validate`] rejects them
    /// up front.
    pub fn custom_roles(&self) -> impl Iterator<Item = (&str, BTreeSet<&str>)> {
        self.custom.iter().filter_map(|(role, raw)| {
            raw.as_array().map(|values| {
                let set = values.iter().filter_map(|v| v.as_str()).collect();
                (role.as_str(), set)
            })
        })
    }
}

/// Token-exchange configuration block
///
/// Appears on a [`TrustedIdp`] (defaults for that IdP) or on a
/// [`ModuleConfig`] (per-module override, with `idpName` naming the IdP the
/// subject token was validated against).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TokenExchangeConfig {
    /// IdP this block belongs to, when configured on a module
    #[serde(default)]
    pub idp_name: Option<String>,
    /// RFC 8693 token endpoint
    pub token_endpoint: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (literal or `{"$secret": …}`)
    pub client_secret: SecretValue,
    /// Default audience when the caller passes none
    #[serde(default)]
    pub audience: Option<String>,
    /// Default scope when the caller passes none
    #[serde(default)]
    pub scope: Option<String>,
    /// Exchanged-token cache policy
    #[serde(default)]
    pub cache: CachePolicy,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl TokenExchangeConfig {
    /// Resolve the secret-bearing fields into a ready-to-use record.
    ///
    /// # Errors
    ///
    /// Propagates secret-resolution failures (fatal at init).
    pub fn resolve(&self, resolver: &SecretResolver) -> ConfigResult<ResolvedTokenExchange> {
        Ok(ResolvedTokenExchange {
            token_endpoint: self.token_endpoint.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.resolve(resolver)?,
            audience: self.audience.clone(),
            scope: self.scope.clone(),
            cache: self.cache.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

/// A [`TokenExchangeConfig`] with every secret resolved
#[derive(Debug, Clone)]
pub struct ResolvedTokenExchange {
    /// RFC 8693 token endpoint
    pub token_endpoint: String,
    /// OAuth client id
    pub client_id: String,
    /// Resolved client secret
    pub client_secret: SecretString,
    /// Default audience
    pub audience: Option<String>,
    /// Default scope
    pub scope: Option<String>,
    /// Cache policy
    pub cache: CachePolicy,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

/// Exchanged-token cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CachePolicy {
    /// Whether exchanged tokens are cached at all
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Upper bound on cached-entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Entry cap per session
    #[serde(default = "default_per_session_cap")]
    pub max_entries_per_session: usize,
    /// Global entry cap (LRU eviction across sessions)
    #[serde(default = "default_total_cap")]
    pub max_total_entries: usize,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_per_session_cap() -> usize {
    16
}

fn default_total_cap() -> usize {
    4096
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl(),
            max_entries_per_session: default_per_session_cap(),
            max_total_entries: default_total_cap(),
        }
    }
}

impl CachePolicy {
    /// TTL as a [`Duration`]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// The `delegation` configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegationConfig {
    /// Module-instance name to module configuration
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

/// One delegation module instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    /// Implementation selector
    #[serde(rename = "type")]
    pub module_type: String,
    /// Token-exchange block for this module, when it acts against a
    /// token-protected backend
    #[serde(default)]
    pub token_exchange: Option<TokenExchangeConfig>,
    /// Free-form settings handed to the module's `initialize`
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl EngineConfig {
    /// Validate the whole document.
    ///
    /// Checks: at least one `requestor-jwt` IdP, (name, issuer, audience)
    /// uniqueness, identifier/URL sanity, non-empty algorithm lists,
    /// well-formed custom role mappings, and module-name sanity. Secret
    /// resolution is checked separately by [`EngineConfig::resolve_secrets`].
    ///
    /// # Errors
    ///
    /// The first failed check, as a [`ConfigError`].
    pub fn validate(&self) -> ConfigResult<()> {
        if !self
            .auth
            .trusted_idps
            .iter()
            .any(|idp| idp.name == REQUESTOR_IDP)
        {
            return Err(ConfigError::MissingRequestorIdp);
        }

        let mut seen = BTreeSet::new();
        for idp in &self.auth.trusted_idps {
            validate_identifier(&idp.name)?;
            validate_https_url(&idp.issuer)?;
            validate_https_url(&idp.jwks_uri)?;

            if idp.audience.is_empty() {
                return Err(ConfigError::invalid_field(
                    format!("auth.trustedIDPs[{}].audience", idp.name),
                    "audience must not be empty",
                ));
            }
            if idp.algorithms.is_empty() {
                return Err(ConfigError::invalid_field(
                    format!("auth.trustedIDPs[{}].algorithms", idp.name),
                    "at least one signing algorithm is required",
                ));
            }
            if !seen.insert((idp.name.clone(), idp.issuer.clone(), idp.audience.clone())) {
                return Err(ConfigError::DuplicateIdp {
                    name: idp.name.clone(),
                    issuer: idp.issuer.clone(),
                    audience: idp.audience.clone(),
                });
            }

            for (role, raw) in &idp.role_mappings.custom {
                let all_strings = raw
                    .as_array()
                    .is_some_and(|values| values.iter().all(serde_json::Value::is_string));
                if !all_strings {
                    return Err(ConfigError::invalid_field(
                        format!("auth.trustedIDPs[{}].roleMappings.{role}", idp.name),
                        "custom role mappings must be arrays of strings",
                    ));
                }
            }

            if let Some(exchange) = &idp.token_exchange {
                validate_https_url(&exchange.token_endpoint)?;
            }
        }

        for (name, module) in &self.delegation.modules {
            validate_identifier(name)?;
            validate_identifier(&module.module_type)?;
            if let Some(exchange) = &module.token_exchange {
                validate_https_url(&exchange.token_endpoint)?;
                if let Some(idp_name) = &exchange.idp_name
                    && !self.auth.trusted_idps.iter().any(|idp| &idp.name == idp_name)
                {
                    return Err(ConfigError::invalid_field(
                        format!("delegation.modules.{name}.tokenExchange.idpName"),
                        format!("references unknown IdP \"{idp_name}\""),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Resolve every secret descriptor in the document, failing fast.
    ///
    /// The resolved values are discarded; this exists so init can reject an
    /// unresolvable document before any component is built.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError::UnresolvedSecret`] encountered.
    pub fn resolve_secrets(&self, resolver: &SecretResolver) -> ConfigResult<()> {
        for idp in &self.auth.trusted_idps {
            if let Some(exchange) = &idp.token_exchange {
                exchange.client_secret.resolve(resolver)?;
            }
        }
        for module in self.delegation.modules.values() {
            if let Some(exchange) = &module.token_exchange {
                exchange.client_secret.resolve(resolver)?;
            }
        }
        Ok(())
    }

    /// All trusted IdPs sharing a logical name, in config order
    pub fn idps_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TrustedIdp> {
        self.auth
            .trusted_idps
            .iter()
            .filter(move |idp| idp.name == name)
    }

    /// Distinct issuer URLs across all trusted IdPs, in config order
    pub fn trusted_issuers(&self) -> Vec<&str> {
        let mut issuers = Vec::new();
        for idp in &self.auth.trusted_idps {
            if !issuers.contains(&idp.issuer.as_str()) {
                issuers.push(idp.issuer.as_str());
            }
        }
        issuers
    }
}
