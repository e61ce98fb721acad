//! RFC 8693 token exchange
//!
//! Turns a validated subject token into a token for a downstream audience,
//! on behalf of the authenticated user. Exchanged tokens are cached in the
//! [`EncryptedTokenCache`] under the canonical *returned* scope, so a
//! downscoped grant is re-served from cache for identical requests while a
//! broader request correctly misses.
//!
//! One retry is attempted on transient failure (connection error or 5xx);
//! nothing else is retried. Failures are never cached.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use obomcp_core::audit::{AuditEntry, AuditSink, AuditSource};
use obomcp_core::config::ResolvedTokenExchange;

use crate::error::ExchangeError;
use crate::token_cache::{EncryptedTokenCache, MIN_REMAINING_LIFETIME, canonical_scope};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// One exchange call
#[derive(Debug, Clone)]
pub struct ExchangeRequest<'a> {
    /// The raw subject token (the caller's validated bearer token)
    pub subject_token: &'a str,
    /// Target audience; falls back to the config default
    pub audience: Option<&'a str>,
    /// Requested scope; falls back to the config default
    pub scope: Option<&'a str>,
    /// Session the exchanged token is bound to
    pub session_id: &'a str,
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: u64,
    #[serde(default)]
    scope: Option<String>,
}

/// Error body many IdPs return alongside non-2xx statuses
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// RFC 8693 client with the encrypted cache in front
pub struct TokenExchangeService {
    http: reqwest::Client,
    cache: Arc<EncryptedTokenCache>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for TokenExchangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeService")
            .field("cache", &self.cache)
            .finish()
    }
}

impl TokenExchangeService {
    /// Create the service over the shared cache and audit sink
    pub fn new(cache: Arc<EncryptedTokenCache>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache,
            audit,
        }
    }

    /// The cache backing this service
    pub fn cache(&self) -> &Arc<EncryptedTokenCache> {
        &self.cache
    }

    /// Exchange a subject token for a downstream-audience token.
    ///
    /// Serves from cache when a live entry bound to the same subject token
    /// has more than a small lifetime floor remaining; otherwise POSTs to
    /// the configured endpoint and caches the result.
    ///
    /// # Errors
    ///
    /// [`ExchangeError`] on IdP rejection, transport failure after the
    /// single retry, or an unusable response. Failures are audited with the
    /// IdP's `error`/`error_description`; callers only see the tag.
    pub async fn exchange(
        &self,
        request: ExchangeRequest<'_>,
        config: &ResolvedTokenExchange,
    ) -> Result<String, ExchangeError> {
        let audience = request
            .audience
            .or(config.audience.as_deref())
            .ok_or(ExchangeError::MissingAudience)?;
        let scope = request.scope.or(config.scope.as_deref());
        let requested_scope = scope.map(canonical_scope).unwrap_or_default();

        let now = SystemTime::now();
        if let Some(hit) = self.cache.get(
            request.session_id,
            audience,
            &requested_scope,
            request.subject_token,
        )? && hit.remaining(now) > MIN_REMAINING_LIFETIME
        {
            debug!(audience, session_id = request.session_id, "token exchange served from cache");
            self.audit.log(
                AuditEntry::success(AuditSource::TokenExchange, "exchange")
                    .with_session(request.session_id)
                    .with_resource(audience)
                    .with_metadata(serde_json::json!({"cacheHit": true})),
            );
            return Ok(hit.token);
        }

        let response = match self.post_exchange(&request, audience, scope, config).await {
            Ok(response) => response,
            Err(e) => {
                self.audit.log(
                    AuditEntry::failure(AuditSource::TokenExchange, "exchange")
                        .with_session(request.session_id)
                        .with_resource(audience)
                        .with_reason(e.kind())
                        .with_error(e.to_string()),
                );
                return Err(e);
            }
        };

        // Cache under the scope the IdP actually granted, not the request.
        let granted_scope = response
            .scope
            .as_deref()
            .map_or_else(|| requested_scope.clone(), canonical_scope);
        let expires_at = SystemTime::now() + Duration::from_secs(response.expires_in);
        self.cache.put(
            request.session_id,
            audience,
            &granted_scope,
            request.subject_token,
            &response.access_token,
            expires_at,
        )?;

        self.audit.log(
            AuditEntry::success(AuditSource::TokenExchange, "exchange")
                .with_session(request.session_id)
                .with_resource(audience)
                .with_metadata(serde_json::json!({
                    "cacheHit": false,
                    "grantedScope": granted_scope,
                })),
        );
        Ok(response.access_token)
    }

    /// POST the exchange request, retrying once on transient failure.
    async fn post_exchange(
        &self,
        request: &ExchangeRequest<'_>,
        audience: &str,
        scope: Option<&str>,
        config: &ResolvedTokenExchange,
    ) -> Result<TokenResponse, ExchangeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(request, audience, scope, config).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt == 1 && is_transient(&e) => {
                    warn!(
                        audience,
                        error = %e,
                        "token exchange transient failure; retrying once"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(
        &self,
        request: &ExchangeRequest<'_>,
        audience: &str,
        scope: Option<&str>,
        config: &ResolvedTokenExchange,
    ) -> Result<TokenResponse, ExchangeError> {
        let mut form = vec![
            ("grant_type", GRANT_TYPE),
            ("subject_token", request.subject_token),
            ("subject_token_type", SUBJECT_TOKEN_TYPE),
            ("audience", audience),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.expose_secret()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        let response = self
            .http
            .post(&config.token_endpoint)
            .timeout(config.request_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ExchangeError::Transport(format!(
                "token endpoint returned status {status}"
            )));
        }
        if !status.is_success() {
            let body: ErrorResponse = response.json().await.unwrap_or_default();
            return Err(ExchangeError::TokenExchangeFailed {
                status: Some(status.as_u16()),
                error: body.error,
                description: body.error_description,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;
        if !body.token_type.eq_ignore_ascii_case("bearer") {
            return Err(ExchangeError::InvalidResponse(format!(
                "unexpected token_type \"{}\"",
                body.token_type
            )));
        }
        Ok(body)
    }
}

/// Connection failures and 5xx responses are retried once; everything else
/// is terminal.
fn is_transient(error: &ExchangeError) -> bool {
    matches!(error, ExchangeError::Transport(_))
}
