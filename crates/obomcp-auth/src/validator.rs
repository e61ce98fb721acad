//! IdP-matching JWT validation
//!
//! Several IdP configurations may share a logical name (the transport
//! selects an identity context by name, e.g. `requestor-jwt`); the validator
//! disambiguates them by the token's issuer and audience, then verifies the
//! signature against that IdP's JWKS.
//!
//! The algorithm gate runs before anything else: `none` and every algorithm
//! outside {RS256, ES256} are rejected from the unverified header, so no
//! downstream code ever sees such a token.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode};
use serde::Deserialize;
use tracing::{debug, warn};

use obomcp_core::config::{SigningAlgorithm, TrustedIdp};

use crate::claims::{self, ValidatedClaims};
use crate::error::{AuthError, AuthResult};
use crate::jwks::JwksStore;

/// Unverified JOSE header fields the validator needs before verification
#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Unverified payload fields used for IdP selection
#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<serde_json::Value>,
}

/// The IdP-matching JWT validator
#[derive(Debug)]
pub struct JwtValidator {
    idps: Vec<TrustedIdp>,
    jwks: JwksStore,
}

impl JwtValidator {
    /// Create a validator over the configured trusted IdPs
    pub fn new(idps: Vec<TrustedIdp>, jwks: JwksStore) -> Self {
        Self { idps, jwks }
    }

    /// The configured IdPs, in config order
    pub fn idps(&self) -> &[TrustedIdp] {
        &self.idps
    }

    /// The JWKS store backing this validator
    pub fn jwks(&self) -> &JwksStore {
        &self.jwks
    }

    /// Validate a bearer token against the IdPs sharing `idp_name`.
    ///
    /// Returns the mapped claims together with the selected IdP config (the
    /// role mapper needs its `roleMappings`).
    ///
    /// # Errors
    ///
    /// One of the validation variants of [`AuthError`]; see the error docs
    /// for the full taxonomy.
    pub async fn validate<'a>(
        &'a self,
        token: &str,
        idp_name: &str,
    ) -> AuthResult<(ValidatedClaims, &'a TrustedIdp)> {
        let (header, payload) = peek(token)?;

        // Algorithm gate before any other processing.
        let alg = match header.alg.as_str() {
            "RS256" => SigningAlgorithm::Rs256,
            "ES256" => SigningAlgorithm::Es256,
            other => {
                warn!(alg = other, "token algorithm outside allowlist");
                return Err(AuthError::InvalidAlgorithm {
                    alg: other.to_string(),
                });
            }
        };

        let issuer = payload
            .iss
            .clone()
            .ok_or_else(|| AuthError::MissingRequiredClaim {
                claim: "iss".to_string(),
            })?;
        let audiences = normalize_audiences(payload.aud.as_ref());

        let idp = self.select_idp(idp_name, &issuer, &audiences)?;
        if !idp.algorithms.contains(&alg) {
            return Err(AuthError::InvalidAlgorithm {
                alg: header.alg.clone(),
            });
        }

        let kid = header.kid.as_deref().ok_or_else(|| AuthError::InvalidToken {
            detail: "missing kid in token header".to_string(),
        })?;
        let jwk = self.jwks.client(&idp.jwks_uri).find_key(kid).await?;
        let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| AuthError::Jwks {
            jwks_uri: idp.jwks_uri.clone(),
            detail: format!("unusable JWK for kid {kid}: {e}"),
        })?;

        let verified = verify_signature(token, &decoding_key, alg, idp)?;
        check_time_claims(&verified, idp)?;

        let claims = claims::extract(&verified, &idp.claim_mappings)?;
        debug!(
            idp = %idp.name,
            issuer = %idp.issuer,
            audience = %idp.audience,
            user_id = %claims.user_id,
            "token validated"
        );
        Ok((claims, idp))
    }

    /// Pick the unique IdP whose name, issuer, and audience all match.
    fn select_idp(
        &self,
        idp_name: &str,
        issuer: &str,
        audiences: &BTreeSet<String>,
    ) -> AuthResult<&TrustedIdp> {
        let mut matches = self.idps.iter().filter(|idp| {
            idp.name == idp_name && idp.issuer == issuer && audiences.contains(&idp.audience)
        });

        let Some(first) = matches.next() else {
            return Err(AuthError::UnknownIdp {
                name: idp_name.to_string(),
                issuer: issuer.to_string(),
            });
        };
        let remaining = matches.count();
        if remaining > 0 {
            return Err(AuthError::AmbiguousIdp {
                name: idp_name.to_string(),
                issuer: issuer.to_string(),
                matches: remaining + 1,
            });
        }
        Ok(first)
    }

    /// Fetch JWKS for every configured IdP, collecting failures.
    ///
    /// Used by startup preflight; an unreachable endpoint is reported, not
    /// fatal.
    pub async fn preflight(&self) -> Vec<(String, AuthError)> {
        let mut failures = Vec::new();
        let mut seen = BTreeSet::new();
        for idp in &self.idps {
            if !seen.insert(idp.jwks_uri.clone()) {
                continue;
            }
            if let Err(e) = self.jwks.client(&idp.jwks_uri).get().await {
                failures.push((idp.jwks_uri.clone(), e));
            }
        }
        failures
    }
}

/// Decode the unverified header and payload for routing decisions.
///
/// Nothing read here is trusted until the signature verifies; the fields are
/// only used to pick the IdP config and to run the algorithm gate.
fn peek(token: &str) -> AuthResult<(RawHeader, RawPayload)> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken {
            detail: "token is not a three-part JWT".to_string(),
        });
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| AuthError::InvalidToken {
            detail: format!("header encoding: {e}"),
        })?;
    let header: RawHeader =
        serde_json::from_slice(&header_bytes).map_err(|e| AuthError::InvalidToken {
            detail: format!("header json: {e}"),
        })?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| AuthError::InvalidToken {
            detail: format!("payload encoding: {e}"),
        })?;
    let payload: RawPayload =
        serde_json::from_slice(&payload_bytes).map_err(|e| AuthError::InvalidToken {
            detail: format!("payload json: {e}"),
        })?;

    Ok((header, payload))
}

/// Normalize the `aud` claim into a set: a string, an array of strings, or
/// absent all collapse to the same shape.
fn normalize_audiences(aud: Option<&serde_json::Value>) -> BTreeSet<String> {
    match aud {
        Some(serde_json::Value::String(s)) => BTreeSet::from([s.clone()]),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Verify the signature plus issuer and audience via `jsonwebtoken`.
///
/// Time claims are validated separately by [`check_time_claims`] so the
/// engine controls the exact boundary semantics and error tags.
fn verify_signature(
    token: &str,
    key: &DecodingKey,
    alg: SigningAlgorithm,
    idp: &TrustedIdp,
) -> AuthResult<serde_json::Map<String, serde_json::Value>> {
    let jwt_alg = match alg {
        SigningAlgorithm::Rs256 => Algorithm::RS256,
        SigningAlgorithm::Es256 => Algorithm::ES256,
    };

    let mut validation = Validation::new(jwt_alg);
    validation.set_audience(&[&idp.audience]);
    validation.set_issuer(&[&idp.issuer]);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;

    let data: TokenData<serde_json::Map<String, serde_json::Value>> =
        decode(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
            jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => AuthError::InvalidAlgorithm {
                alg: alg.as_str().to_string(),
            },
            _ => AuthError::InvalidToken {
                detail: e.to_string(),
            },
        })?;
    Ok(data.claims)
}

/// Validate `exp`, `nbf`, and `iat` from the verified claims.
///
/// Boundaries: `exp = now - tolerance` is rejected, one second later is
/// accepted; `nbf` mirrors that on the other side; `iat` older than the
/// configured maximum age is rejected. `exp` is required; `nbf` is required
/// only when the IdP says so; `iat` is checked when present.
fn check_time_claims(
    claims: &serde_json::Map<String, serde_json::Value>,
    idp: &TrustedIdp,
) -> AuthResult<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let tolerance = idp.clock_tolerance_secs;

    let exp = claims
        .get("exp")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| AuthError::MissingRequiredClaim {
            claim: "exp".to_string(),
        })?;
    if exp.saturating_add(tolerance) <= now {
        return Err(AuthError::TokenExpired);
    }

    match claims.get("nbf").and_then(serde_json::Value::as_u64) {
        Some(nbf) => {
            if nbf > now.saturating_add(tolerance) {
                return Err(AuthError::TokenNotYetValid);
            }
        }
        None if idp.require_nbf => {
            return Err(AuthError::MissingRequiredClaim {
                claim: "nbf".to_string(),
            });
        }
        None => {}
    }

    if let Some(iat) = claims.get("iat").and_then(serde_json::Value::as_u64) {
        let age = now.saturating_sub(iat);
        if age > idp.max_token_age_secs {
            return Err(AuthError::TokenTooOld {
                age_secs: age,
                max_secs: idp.max_token_age_secs,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn idp_with(clock_tolerance_secs: u64, max_token_age_secs: u64, require_nbf: bool) -> TrustedIdp {
        serde_json::from_value(json!({
            "name": "requestor-jwt",
            "issuer": "https://idp.example",
            "audience": "mcp",
            "jwksUri": "https://idp.example/jwks",
            "clockToleranceSecs": clock_tolerance_secs,
            "maxTokenAgeSecs": max_token_age_secs,
            "requireNbf": require_nbf,
        }))
        .unwrap()
    }

    fn claims_with(fields: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        fields.as_object().unwrap().clone()
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn encode_unsigned(header: serde_json::Value, payload: serde_json::Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[test]
    fn peek_reads_header_and_payload() {
        let token = encode_unsigned(
            json!({"alg": "RS256", "kid": "k1"}),
            json!({"iss": "https://idp.example", "aud": "mcp"}),
        );
        let (header, payload) = peek(&token).unwrap();
        assert_eq!(header.alg, "RS256");
        assert_eq!(header.kid.as_deref(), Some("k1"));
        assert_eq!(payload.iss.as_deref(), Some("https://idp.example"));
    }

    #[test]
    fn peek_rejects_malformed_tokens() {
        assert!(peek("only.two").is_err());
        assert!(peek("a.b.c.d").is_err());
        assert!(peek("!!!.???.sig").is_err());
    }

    #[tokio::test]
    async fn none_algorithm_rejected_before_anything_else() {
        // No IdP configured at all: the algorithm gate must still fire first.
        let validator = JwtValidator::new(vec![], JwksStore::new());
        let token = encode_unsigned(json!({"alg": "none"}), json!({"iss": "x", "aud": "y"}));
        let err = validator.validate(&token, "requestor-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAlgorithm { .. }));
    }

    #[tokio::test]
    async fn hs256_rejected() {
        let validator = JwtValidator::new(vec![], JwksStore::new());
        let token = encode_unsigned(json!({"alg": "HS256"}), json!({}));
        let err = validator.validate(&token, "requestor-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAlgorithm { .. }));
    }

    #[test]
    fn audience_normalization_string_vs_array() {
        let from_string = normalize_audiences(Some(&json!("mcp")));
        let from_array = normalize_audiences(Some(&json!(["mcp"])));
        assert_eq!(from_string, from_array);
        assert!(normalize_audiences(None).is_empty());
    }

    #[test]
    fn idp_selection_zero_one_many() {
        let mut second = idp_with(60, 86_400, false);
        second.audience = "mcp-public".to_string();
        let validator = JwtValidator::new(vec![idp_with(60, 86_400, false), second], JwksStore::new());

        let auds = BTreeSet::from(["mcp-public".to_string()]);
        let selected = validator
            .select_idp("requestor-jwt", "https://idp.example", &auds)
            .unwrap();
        assert_eq!(selected.audience, "mcp-public");

        let none = BTreeSet::from(["other".to_string()]);
        assert!(matches!(
            validator.select_idp("requestor-jwt", "https://idp.example", &none),
            Err(AuthError::UnknownIdp { .. })
        ));

        let duplicated = JwtValidator::new(
            vec![idp_with(60, 86_400, false), idp_with(60, 86_400, false)],
            JwksStore::new(),
        );
        let auds = BTreeSet::from(["mcp".to_string()]);
        assert!(matches!(
            duplicated.select_idp("requestor-jwt", "https://idp.example", &auds),
            Err(AuthError::AmbiguousIdp { .. })
        ));
    }

    #[test]
    fn exp_boundary_is_exact() {
        let idp = idp_with(60, 86_400, false);
        let now = now_secs();

        // exp = now - tolerance: rejected
        let at_boundary = claims_with(json!({"exp": now - 60}));
        assert!(matches!(
            check_time_claims(&at_boundary, &idp),
            Err(AuthError::TokenExpired)
        ));

        // exp = now - tolerance + 1: accepted
        let inside = claims_with(json!({"exp": now - 59}));
        assert!(check_time_claims(&inside, &idp).is_ok());
    }

    #[test]
    fn exp_is_required() {
        let idp = idp_with(60, 86_400, false);
        let err = check_time_claims(&claims_with(json!({})), &idp).unwrap_err();
        assert!(matches!(err, AuthError::MissingRequiredClaim { .. }));
    }

    #[test]
    fn nbf_policy() {
        let now = now_secs();
        let lenient = idp_with(60, 86_400, false);
        let strict = idp_with(60, 86_400, true);

        let future_nbf = claims_with(json!({"exp": now + 600, "nbf": now + 600}));
        assert!(matches!(
            check_time_claims(&future_nbf, &lenient),
            Err(AuthError::TokenNotYetValid)
        ));

        let no_nbf = claims_with(json!({"exp": now + 600}));
        assert!(check_time_claims(&no_nbf, &lenient).is_ok());
        assert!(matches!(
            check_time_claims(&no_nbf, &strict),
            Err(AuthError::MissingRequiredClaim { .. })
        ));
    }

    #[test]
    fn old_iat_rejected() {
        let now = now_secs();
        let idp = idp_with(60, 300, false);
        let stale = claims_with(json!({"exp": now + 600, "iat": now - 301}));
        assert!(matches!(
            check_time_claims(&stale, &idp),
            Err(AuthError::TokenTooOld { .. })
        ));

        let fresh = claims_with(json!({"exp": now + 600, "iat": now - 10}));
        assert!(check_time_claims(&fresh, &idp).is_ok());
    }
}
