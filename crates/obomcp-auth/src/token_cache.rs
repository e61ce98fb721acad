//! Encrypted cache for exchanged tokens
//!
//! Entries are keyed by `(session_id, audience, canonical scope)` and
//! encrypted with AES-256-GCM under a per-session key derived via
//! HKDF-SHA256 from a process-wide root key (fresh at process start) with
//! the session id as salt. The additional authenticated data is the SHA-256
//! of the subject token, so an entry written under one subject token can
//! never be read - or replaced - under another.
//!
//! Entry lifetime is the lesser of the token's own expiry and the configured
//! TTL. Capacity is bounded per session and globally; the global bound
//! evicts the least-recently-used entry across sessions under a lock held
//! only long enough to pick and remove the victim.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use obomcp_core::audit::{AuditEntry, AuditSink, AuditSource};
use obomcp_core::config::CachePolicy;

use crate::error::CacheError;

/// Lifetime floor under which a cached token is not worth returning
pub const MIN_REMAINING_LIFETIME: Duration = Duration::from_secs(5);

const KEY_CONTEXT: &[u8] = b"obomcp token cache v1";

/// Process-wide cache root key, zeroized on shutdown
#[derive(Zeroize, ZeroizeOnDrop)]
struct RootKey([u8; 32]);

/// One encrypted entry
struct CacheEntry {
    nonce: [u8; 12],
    /// Ciphertext with the GCM tag appended
    ciphertext: Vec<u8>,
    /// SHA-256 of the subject token the entry is bound to
    aad: [u8; 32],
    expires_at: SystemTime,
    last_used: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

type Shard = Mutex<HashMap<(String, String), CacheEntry>>;

/// A decrypted cache hit
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The exchanged token
    pub token: String,
    /// When the entry lapses
    pub expires_at: SystemTime,
}

impl CachedToken {
    /// Remaining lifetime relative to `now`, zero when lapsed
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.expires_at.duration_since(now).unwrap_or(Duration::ZERO)
    }
}

/// The encrypted token cache
pub struct EncryptedTokenCache {
    policy: CachePolicy,
    root_key: RwLock<Option<RootKey>>,
    shards: dashmap::DashMap<String, Shard>,
    total: AtomicUsize,
    tick: AtomicU64,
    evict_lock: Mutex<()>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for EncryptedTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedTokenCache")
            .field("policy", &self.policy)
            .field("total", &self.total.load(Ordering::Relaxed))
            .field("root_key", &"<redacted>")
            .finish()
    }
}

/// Canonicalize a scope string: lowercase, ASCII-whitespace split, sorted,
/// deduplicated. `"B a"` and `"a b"` collapse to the same key.
pub fn canonical_scope(scope: &str) -> String {
    let mut parts: Vec<String> = scope
        .split_ascii_whitespace()
        .map(str::to_ascii_lowercase)
        .collect();
    parts.sort();
    parts.dedup();
    parts.join(" ")
}

fn subject_aad(subject_token: &str) -> [u8; 32] {
    Sha256::digest(subject_token.as_bytes()).into()
}

impl EncryptedTokenCache {
    /// Create a cache with a freshly generated root key
    pub fn new(policy: CachePolicy, audit: Arc<dyn AuditSink>) -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            policy,
            root_key: RwLock::new(Some(RootKey(key.into()))),
            shards: dashmap::DashMap::new(),
            total: AtomicUsize::new(0),
            tick: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
            audit,
        }
    }

    /// The cache policy in force
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Number of live entries across all sessions
    pub fn len(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn derive_session_key(
        root: &RootKey,
        session_id: &str,
    ) -> Result<Key<Aes256Gcm>, CacheError> {
        let hk = Hkdf::<Sha256>::new(Some(session_id.as_bytes()), &root.0);
        let mut okm = [0u8; 32];
        hk.expand(KEY_CONTEXT, &mut okm)
            .map_err(|e| CacheError::Crypto(e.to_string()))?;
        let key = Key::<Aes256Gcm>::from(okm);
        okm.zeroize();
        Ok(key)
    }

    /// Store an exchanged token.
    ///
    /// Entry lifetime is `min(token_expires_at, now + ttl)`; already-lapsed
    /// tokens are not stored. An existing live entry bound to a different
    /// subject token is retained untouched.
    ///
    /// # Errors
    ///
    /// [`CacheError::Closed`] after shutdown; [`CacheError::Crypto`] when
    /// encryption fails.
    pub fn put(
        &self,
        session_id: &str,
        audience: &str,
        scope: &str,
        subject_token: &str,
        token: &str,
        token_expires_at: SystemTime,
    ) -> Result<(), CacheError> {
        if !self.policy.enabled {
            return Ok(());
        }

        let now = SystemTime::now();
        let expires_at = token_expires_at.min(now + self.policy.ttl());
        if expires_at <= now {
            return Ok(());
        }

        let aad = subject_aad(subject_token);
        let key = {
            let root = self.root_key.read();
            let root = root.as_ref().ok_or(CacheError::Closed)?;
            Self::derive_session_key(root, session_id)?
        };

        let cipher = Aes256Gcm::new(&key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: token.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|e| CacheError::Crypto(e.to_string()))?;

        let entry = CacheEntry {
            nonce: nonce.into(),
            ciphertext,
            aad,
            expires_at,
            last_used: self.tick.fetch_add(1, Ordering::Relaxed),
        };

        let cache_key = (audience.to_string(), canonical_scope(scope));
        {
            let shard = self
                .shards
                .entry(session_id.to_string())
                .or_insert_with(|| Mutex::new(HashMap::new()));
            let mut map = shard.lock();

            if let Some(existing) = map.get(&cache_key)
                && existing.aad != aad
                && !existing.is_expired(now)
            {
                drop(map);
                self.audit.log(
                    AuditEntry::failure(AuditSource::Cache, "put")
                        .with_session(session_id)
                        .with_resource(audience)
                        .with_reason("subject token mismatch; existing entry retained"),
                );
                return Ok(());
            }

            if map.insert(cache_key, entry).is_none() {
                self.total.fetch_add(1, Ordering::Relaxed);
            }

            while map.len() > self.policy.max_entries_per_session {
                let victim = map
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone());
                match victim {
                    Some(k) => {
                        map.remove(&k);
                        self.total.fetch_sub(1, Ordering::Relaxed);
                        debug!(session_id, "token cache per-session cap eviction");
                    }
                    None => break,
                }
            }
        }

        self.enforce_global_cap();
        Ok(())
    }

    /// Look up an exchanged token.
    ///
    /// A hit requires the exact key tuple and an identical subject-token
    /// binding; anything else is a miss. Lapsed entries are evicted on the
    /// way through.
    ///
    /// # Errors
    ///
    /// [`CacheError::Closed`] after shutdown.
    pub fn get(
        &self,
        session_id: &str,
        audience: &str,
        scope: &str,
        subject_token: &str,
    ) -> Result<Option<CachedToken>, CacheError> {
        if !self.policy.enabled {
            return Ok(None);
        }

        let key = {
            let root = self.root_key.read();
            let root = root.as_ref().ok_or(CacheError::Closed)?;
            Self::derive_session_key(root, session_id)?
        };

        let now = SystemTime::now();
        let aad = subject_aad(subject_token);
        let cache_key = (audience.to_string(), canonical_scope(scope));

        enum Lookup {
            Miss,
            Expired,
            AadMismatch,
            Candidate {
                nonce: [u8; 12],
                ciphertext: Vec<u8>,
                expires_at: SystemTime,
            },
        }

        let lookup = {
            let Some(shard) = self.shards.get(session_id) else {
                return Ok(None);
            };
            let mut map = shard.lock();
            let state = match map.get(&cache_key) {
                None => Lookup::Miss,
                Some(entry) if entry.is_expired(now) => Lookup::Expired,
                Some(entry) if entry.aad != aad => Lookup::AadMismatch,
                Some(entry) => Lookup::Candidate {
                    nonce: entry.nonce,
                    ciphertext: entry.ciphertext.clone(),
                    expires_at: entry.expires_at,
                },
            };
            if matches!(state, Lookup::Expired) {
                map.remove(&cache_key);
                self.total.fetch_sub(1, Ordering::Relaxed);
            }
            state
        };

        let (nonce, ciphertext, expires_at) = match lookup {
            Lookup::Miss | Lookup::Expired => return Ok(None),
            Lookup::AadMismatch => {
                self.audit.log(
                    AuditEntry::failure(AuditSource::Cache, "get")
                        .with_session(session_id)
                        .with_resource(audience)
                        .with_reason("subject token mismatch"),
                );
                return Ok(None);
            }
            Lookup::Candidate {
                nonce,
                ciphertext,
                expires_at,
            } => (nonce, ciphertext, expires_at),
        };

        let cipher = Aes256Gcm::new(&key);
        let plaintext = cipher.decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        );

        let token = plaintext.ok().and_then(|bytes| String::from_utf8(bytes).ok());
        let Some(token) = token else {
            // Undecryptable under the matching AAD: corrupt, drop it.
            if let Some(shard) = self.shards.get(session_id)
                && shard.lock().remove(&cache_key).is_some()
            {
                self.total.fetch_sub(1, Ordering::Relaxed);
            }
            self.audit.log(
                AuditEntry::failure(AuditSource::Cache, "get")
                    .with_session(session_id)
                    .with_resource(audience)
                    .with_reason("entry failed authentication; evicted"),
            );
            return Ok(None);
        };

        if let Some(shard) = self.shards.get(session_id)
            && let Some(entry) = shard.lock().get_mut(&cache_key)
        {
            entry.last_used = self.tick.fetch_add(1, Ordering::Relaxed);
        }

        Ok(Some(CachedToken { token, expires_at }))
    }

    /// Evict LRU entries across sessions until the global cap holds.
    fn enforce_global_cap(&self) {
        while self.total.load(Ordering::Relaxed) > self.policy.max_total_entries {
            let _guard = self.evict_lock.lock();
            if self.total.load(Ordering::Relaxed) <= self.policy.max_total_entries {
                break;
            }

            let mut victim: Option<(String, (String, String), u64)> = None;
            for shard in &self.shards {
                let map = shard.value().lock();
                if let Some((key, entry)) = map.iter().min_by_key(|(_, e)| e.last_used)
                    && victim.as_ref().is_none_or(|(_, _, used)| entry.last_used < *used)
                {
                    victim = Some((shard.key().clone(), key.clone(), entry.last_used));
                }
            }

            match victim {
                Some((session_id, key, _)) => {
                    if let Some(shard) = self.shards.get(&session_id)
                        && shard.lock().remove(&key).is_some()
                    {
                        self.total.fetch_sub(1, Ordering::Relaxed);
                        debug!(session_id = %session_id, "token cache global LRU eviction");
                    }
                }
                None => break,
            }
        }
    }

    /// Wipe every entry belonging to a session (explicit session end)
    pub fn end_session(&self, session_id: &str) {
        if let Some((_, shard)) = self.shards.remove(session_id) {
            let removed = shard.lock().len();
            if removed > 0 {
                self.total.fetch_sub(removed, Ordering::Relaxed);
            }
        }
    }

    /// Wipe all entries and zeroize the root key. Idempotent; every later
    /// operation fails with [`CacheError::Closed`].
    pub fn shutdown(&self) {
        let mut root = self.root_key.write();
        self.shards.clear();
        self.total.store(0, Ordering::Relaxed);
        *root = None; // RootKey zeroizes on drop
    }
}
