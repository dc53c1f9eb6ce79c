//! # Embed Access Tokens
//!
//! Short-lived bearer tokens minted when an embed signature checks out.
//! The embedding client exchanges its signed URL for one of these and
//! uses it for the API calls the embedded view makes.
//!
//! Tokens are pure capability strings: the backing store keeps only
//! `namespaced key -> expiry`, nothing else, so an expired token is
//! indistinguishable from one that never existed.

use crate::clock::Clock;
use crate::primitives::{ACCESS_TOKEN_BYTES, ACCESS_TOKEN_PREFIX};
use crate::types::GlimpseError;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Expiring key-value presence store.
///
/// The only queries the token flow needs are "remember this key for N
/// seconds" and "is this key still live". Implementations decide where
/// the keys actually live.
pub trait EphemeralStore: Send + Sync {
    /// Record `key` as live for the next `ttl_seconds`.
    fn put(&self, key: &str, ttl_seconds: i64) -> Result<(), GlimpseError>;

    /// Whether `key` was recorded and has not expired yet.
    fn get(&self, key: &str) -> Result<bool, GlimpseError>;
}

/// Process-local [`EphemeralStore`] backed by a map of expiry times.
pub struct InMemoryEphemeralStore {
    entries: Mutex<BTreeMap<String, i64>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEphemeralStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, i64>> {
        // A poisoned lock only means another thread panicked mid-insert;
        // the map itself is still a valid expiry table.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EphemeralStore for InMemoryEphemeralStore {
    fn put(&self, key: &str, ttl_seconds: i64) -> Result<(), GlimpseError> {
        let now = self.clock.now_unix();
        let mut entries = self.lock();
        entries.retain(|_, expires_at| *expires_at > now);
        entries.insert(key.to_string(), now + ttl_seconds);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<bool, GlimpseError> {
        let now = self.clock.now_unix();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// Generate a URL-safe random token with `num_bytes` of entropy.
#[must_use]
pub fn generate_token(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Issues and validates embed access tokens.
#[derive(Clone)]
pub struct AccessTokenStore {
    store: Arc<dyn EphemeralStore>,
}

impl AccessTokenStore {
    #[must_use]
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// Mint a fresh token valid for `ttl_seconds`.
    pub fn issue(&self, ttl_seconds: i64) -> Result<String, GlimpseError> {
        let token = generate_token(ACCESS_TOKEN_BYTES);
        let key = format!("{ACCESS_TOKEN_PREFIX}{token}");
        self.store.put(&key, ttl_seconds)?;
        Ok(token)
    }

    /// Whether `token` was issued here and is still within its TTL.
    pub fn is_valid(&self, token: &str) -> Result<bool, GlimpseError> {
        let key = format!("{ACCESS_TOKEN_PREFIX}{token}");
        self.store.get(&key)
    }
}
