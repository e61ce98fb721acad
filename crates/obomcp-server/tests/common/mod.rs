//! Test harness: RSA keypair, a wiremock IdP (JWKS + token endpoint), and a
//! scriptable delegation module.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use obomcp_core::config::ModuleConfig;
use obomcp_core::session::{FrameworkRole, UserSession};
use obomcp_server::error::DelegationError;
use obomcp_server::module::{DelegationCtx, DelegationModule, DelegationResult};

pub struct TestKeyPair {
    encoding_key: EncodingKey,
    n: String,
    e: String,
    pub kid: String,
}

impl TestKeyPair {
    pub fn generate(kid: &str) -> Self {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate RSA-2048 key");
        let public_key = RsaPublicKey::from(&private_key);
        let pkcs8_pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .expect("export RSA key as PKCS8 PEM");
        Self {
            encoding_key: EncodingKey::from_rsa_pem(pkcs8_pem.as_bytes())
                .expect("EncodingKey from PEM"),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            kid: kid.to_string(),
        }
    }

    pub fn jwk(&self) -> serde_json::Value {
        json!({
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": self.kid,
            "n": self.n,
            "e": self.e,
        })
    }

    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).expect("sign test JWT")
    }
}

pub struct MockIdp {
    pub server: MockServer,
    pub keypair: TestKeyPair,
}

impl MockIdp {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let keypair = TestKeyPair::generate("e2e-key-1");
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"keys": [keypair.jwk()]})),
            )
            .mount(&server)
            .await;
        Self { server, keypair }
    }

    pub async fn mount_token_endpoint(&self, access_token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(&self.server)
            .await;
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub async fn requests_to(&self, wanted: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == wanted)
            .count()
    }

    pub fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    /// A live requestor token for `sub=u-1` with the given roles
    pub fn token(&self, audience: &str, roles: &[&str]) -> String {
        let now = Self::now();
        self.keypair.sign(&json!({
            "iss": self.issuer(),
            "aud": [audience],
            "sub": "u-1",
            "preferred_username": "alice",
            "realm_access": {"roles": roles},
            "iat": now,
            "nbf": now,
            "exp": now + 600,
        }))
    }

    /// Engine config with one requestor IdP and one `db` module whose
    /// token-exchange block points at this server
    pub fn engine_config(&self) -> obomcp_core::config::EngineConfig {
        serde_json::from_value(json!({
            "auth": {
                "trustedIDPs": [{
                    "name": "requestor-jwt",
                    "issuer": self.issuer(),
                    "audience": "mcp",
                    "jwksUri": format!("{}/jwks", self.issuer()),
                    "algorithms": ["RS256"],
                    "claimMappings": {
                        "roles": "realm_access.roles",
                        "userId": "sub",
                        "username": "preferred_username",
                    },
                    "roleMappings": {
                        "admin": ["admin"],
                        "user": ["user"],
                        "defaultRole": "guest",
                    },
                }],
            },
            "delegation": {
                "modules": {
                    "db": {
                        "type": "sql",
                        "tokenExchange": {
                            "tokenEndpoint": format!("{}/token", self.issuer()),
                            "clientId": "obomcp-client",
                            "clientSecret": "client-secret",
                            "audience": "db",
                        },
                    },
                },
            },
        }))
        .expect("valid test engine config")
    }
}

/// Scriptable module: echoes actions, can exchange credentials, panic, or
/// refuse access on demand.
pub struct TestModule {
    name: String,
    pub allow_role: Option<FrameworkRole>,
    pub healthy: AtomicBool,
    pub initialized: AtomicBool,
    pub destroy_log: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl TestModule {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            allow_role: None,
            healthy: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            destroy_log: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn with_destroy_log(mut self, log: Arc<parking_lot::Mutex<Vec<String>>>) -> Self {
        self.destroy_log = log;
        self
    }
}

#[async_trait]
impl DelegationModule for TestModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn module_type(&self) -> &str {
        "sql"
    }

    async fn initialize(&self, _config: &ModuleConfig) -> Result<(), DelegationError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn delegate(
        &self,
        session: &UserSession,
        action: &str,
        params: &serde_json::Value,
        ctx: &DelegationCtx,
    ) -> DelegationResult {
        match action {
            "panic" => panic!("backend exploded at /var/lib/db/socket"),
            "fetch-credential" => match ctx.exchange_token(session, None, None).await {
                Ok(credential) => DelegationResult::ok(
                    &self.name,
                    session,
                    action,
                    json!({"credential": credential}),
                ),
                Err(e) => DelegationResult::failed(
                    &self.name,
                    session,
                    action,
                    &DelegationError::TokenExchange(e),
                    "exchange failed in test module",
                ),
            },
            _ => DelegationResult::ok(
                &self.name,
                session,
                action,
                json!({"action": action, "params": params, "user": session.user_id}),
            ),
        }
    }

    fn validate_access(&self, session: &UserSession) -> bool {
        match &self.allow_role {
            Some(role) => session.role == *role,
            None => session.role.is_assigned(),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn destroy(&self) -> Result<(), DelegationError> {
        self.destroy_log.lock().push(self.name.clone());
        Ok(())
    }
}

/// A bare session for registry-level tests
pub fn session(role: FrameworkRole) -> UserSession {
    UserSession {
        user_id: "u-1".to_string(),
        username: "alice".to_string(),
        legacy_username: None,
        role,
        custom_roles: Default::default(),
        scopes: Default::default(),
        claims: serde_json::Map::new(),
        session_id: "s-test".to_string(),
    }
}
