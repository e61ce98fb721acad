//! JWKS fetching and caching
//!
//! One [`JwksClient`] exists per `jwks_uri`. Fetches go through a
//! single-flight mutex so concurrent validations against the same endpoint
//! trigger at most one network request per refresh; the forced-refresh path
//! used when a token carries an unknown `kid` is additionally rate limited
//! to one attempt per URI per short window, which defeats kid-cycling
//! denial-of-service against the authorization server.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};

/// Default cache TTL (10 minutes; the configurable floor is 5)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Window during which at most one forced refresh per URI is attempted
pub const FORCED_REFRESH_WINDOW: Duration = Duration::from_secs(10);

/// JWKS cache entry with its fetch time
#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: SystemTime,
    ttl: Duration,
}

impl CachedJwks {
    fn is_fresh(&self) -> bool {
        match SystemTime::now().duration_since(self.fetched_at) {
            Ok(age) => age < self.ttl,
            Err(_) => false, // clock went backwards, invalidate
        }
    }
}

/// JWKS client for one endpoint
///
/// # Example
///
/// ```rust,no_run
/// # use obomcp_auth::jwks::JwksClient;
/// # tokio_test::block_on(async {
/// let client = JwksClient::new("https://idp.example/jwks".to_string());
///
/// // Cached for ten minutes; concurrent callers share one fetch.
/// let jwks = client.get().await?;
/// if let Some(key) = jwks.find("key-id-123") {
///     // verify a signature with it
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug)]
pub struct JwksClient {
    jwks_uri: String,
    http: reqwest::Client,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedJwks>>,
    /// Serializes fetches; holders re-check the cache before hitting the network
    fetch_lock: Mutex<()>,
    last_forced_refresh: RwLock<Option<SystemTime>>,
}

impl JwksClient {
    /// Create a client with the default TTL
    pub fn new(jwks_uri: String) -> Self {
        Self::with_ttl(jwks_uri, DEFAULT_CACHE_TTL)
    }

    /// Create a client with a custom cache TTL
    pub fn with_ttl(jwks_uri: String, cache_ttl: Duration) -> Self {
        Self {
            jwks_uri,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cache_ttl,
            cache: RwLock::new(None),
            fetch_lock: Mutex::new(()),
            last_forced_refresh: RwLock::new(None),
        }
    }

    /// The endpoint this client fetches from
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Get the key set, fetching if the cache is stale.
    ///
    /// Concurrent callers block on one in-flight fetch; reads of a fresh
    /// cache never touch the fetch path.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Jwks`] when the endpoint is unreachable or the
    /// response is not a key set.
    pub async fn get(&self) -> AuthResult<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.is_fresh()
            {
                debug!(jwks_uri = %self.jwks_uri, "using cached JWKS");
                return Ok(cached.jwks.clone());
            }
        }

        let _flight = self.fetch_lock.lock().await;
        // Another task may have refreshed while we waited for the lock.
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.is_fresh()
            {
                return Ok(cached.jwks.clone());
            }
        }
        self.fetch_and_store().await
    }

    /// Look up a key by `kid`, forcing one refresh when it is absent.
    ///
    /// The forced refresh is rate limited: within
    /// [`FORCED_REFRESH_WINDOW`] of the previous forced attempt the cached
    /// set is re-checked but the network is not.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownKey`] when no key matches after the
    /// (possibly skipped) refresh, or [`AuthError::Jwks`] on fetch failure.
    pub async fn find_key(&self, kid: &str) -> AuthResult<Jwk> {
        let jwks = self.get().await?;
        if let Some(jwk) = jwks.find(kid) {
            return Ok(jwk.clone());
        }

        let _flight = self.fetch_lock.lock().await;
        // The refresh we were about to force may already have happened.
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && let Some(jwk) = cached.jwks.find(kid)
            {
                return Ok(jwk.clone());
            }
        }

        let within_window = {
            let last = self.last_forced_refresh.read().await;
            last.is_some_and(|at| {
                SystemTime::now()
                    .duration_since(at)
                    .is_ok_and(|since| since < FORCED_REFRESH_WINDOW)
            })
        };
        if within_window {
            warn!(
                jwks_uri = %self.jwks_uri,
                kid = kid,
                "forced JWKS refresh rate limited; unknown kid stays unknown"
            );
            return Err(AuthError::UnknownKey {
                kid: kid.to_string(),
            });
        }

        {
            let mut last = self.last_forced_refresh.write().await;
            *last = Some(SystemTime::now());
        }
        let jwks = self.fetch_and_store().await?;
        jwks.find(kid).cloned().ok_or_else(|| AuthError::UnknownKey {
            kid: kid.to_string(),
        })
    }

    /// Fetch the key set and replace the cache. Callers hold `fetch_lock`.
    async fn fetch_and_store(&self) -> AuthResult<JwkSet> {
        info!(jwks_uri = %self.jwks_uri, "fetching JWKS");

        if !self.jwks_uri.starts_with("https://")
            && !self.jwks_uri.starts_with("http://localhost")
            && !self.jwks_uri.starts_with("http://127.0.0.1")
        {
            return Err(AuthError::Jwks {
                jwks_uri: self.jwks_uri.clone(),
                detail: "endpoint must use HTTPS (HTTP only allowed for localhost)".to_string(),
            });
        }

        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::Jwks {
                jwks_uri: self.jwks_uri.clone(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AuthError::Jwks {
                jwks_uri: self.jwks_uri.clone(),
                detail: format!("endpoint returned status {}", response.status()),
            });
        }

        let jwks: JwkSet = response.json().await.map_err(|e| AuthError::Jwks {
            jwks_uri: self.jwks_uri.clone(),
            detail: format!("invalid JWKS body: {e}"),
        })?;

        info!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "JWKS fetched"
        );

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: SystemTime::now(),
            ttl: self.cache_ttl,
        });
        Ok(jwks)
    }

    /// Drop the cached key set
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }
}

/// Clients for every configured JWKS endpoint, keyed by URI
///
/// Reads are wait-free once a client exists; creation is get-or-insert.
#[derive(Debug)]
pub struct JwksStore {
    clients: dashmap::DashMap<String, Arc<JwksClient>>,
    cache_ttl: Duration,
}

impl Default for JwksStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksStore {
    /// Create a store with the default per-client TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Create a store with a custom per-client TTL
    pub fn with_ttl(cache_ttl: Duration) -> Self {
        Self {
            clients: dashmap::DashMap::new(),
            cache_ttl,
        }
    }

    /// Get or create the client for a JWKS endpoint
    pub fn client(&self, jwks_uri: &str) -> Arc<JwksClient> {
        if let Some(client) = self.clients.get(jwks_uri) {
            return Arc::clone(&client);
        }
        self.clients
            .entry(jwks_uri.to_string())
            .or_insert_with(|| Arc::new(JwksClient::with_ttl(jwks_uri.to_string(), self.cache_ttl)))
            .clone()
    }
}
