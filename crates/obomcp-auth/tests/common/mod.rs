//! Shared test harness: an RSA-2048 keypair plus a wiremock-backed IdP that
//! serves JWKS and signs RS256 tokens for it.

#![allow(dead_code)]

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use obomcp_core::config::TrustedIdp;

/// RSA keypair for signing test tokens and publishing JWKS
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
        let encoding_key =
            EncodingKey::from_rsa_pem(pkcs8_pem.as_bytes()).expect("EncodingKey from PEM");

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        Self {
            encoding_key,
            n,
            e,
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

/// A mock IdP: wiremock server + signing key
pub struct MockIdp {
    pub server: MockServer,
    pub keypair: TestKeyPair,
}

impl MockIdp {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let idp = Self {
            server,
            keypair: TestKeyPair::generate("test-key-1"),
        };
        idp.mount_jwks(vec![idp.keypair.jwk()]).await;
        idp
    }

    /// Replace the JWKS response with the given key list
    pub async fn mount_jwks(&self, keys: Vec<serde_json::Value>) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": keys})))
            .mount(&self.server)
            .await;
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}/jwks", self.server.uri())
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.server.uri())
    }

    /// Count requests the server received for a path
    pub async fn requests_to(&self, wanted: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == wanted)
            .count()
    }

    /// Build a trusted-IdP config pointing at this server
    pub fn idp_config(&self, name: &str, audience: &str, extra: serde_json::Value) -> TrustedIdp {
        let mut doc = json!({
            "name": name,
            "issuer": self.issuer(),
            "audience": audience,
            "jwksUri": self.jwks_uri(),
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
        });
        if let (Some(base), Some(patch)) = (doc.as_object_mut(), extra.as_object()) {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(doc).expect("valid test IdP config")
    }

    pub fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    /// Standard live claims for this IdP
    pub fn claims(&self, audience: &str, roles: &[&str]) -> serde_json::Value {
        let now = Self::now();
        json!({
            "iss": self.issuer(),
            "aud": [audience],
            "sub": "u-1",
            "preferred_username": "alice",
            "realm_access": {"roles": roles},
            "iat": now,
            "nbf": now,
            "exp": now + 600,
        })
    }
}
