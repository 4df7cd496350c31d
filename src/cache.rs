//! Key cache — amortizes Argon2id derivations across repeated unlocks.
//!
//! Keys are cached by a SHA-256 digest of (password, salt, KDF params) —
//! the plaintext password is never stored. Entries are bounded by count
//! (LRU), absolute age, and idle time; a background sweep evicts expired
//! entries, but expiry is also checked on every lookup, so the cache
//! behaves identically (only slower) without the sweep running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{self, DerivedKey, KdfConfig};
use crate::error::VaultResult;

/// Cache bounds. Defaults: 10 entries, 30 minute lifetime, 5 minute idle
/// timeout, sweep every minute.
#[derive(Debug, Clone)]
pub struct KeyCacheConfig {
    pub max_entries: usize,
    pub max_age: Duration,
    pub max_idle: Duration,
    pub sweep_interval: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            max_age: Duration::from_secs(30 * 60),
            max_idle: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct CacheEntry {
    key: DerivedKey,
    created_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn is_valid(&self, config: &KeyCacheConfig, now: Instant) -> bool {
        now.duration_since(self.created_at) < config.max_age
            && now.duration_since(self.last_accessed_at) < config.max_idle
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub total_access_count: u64,
    pub oldest_entry: Option<Instant>,
    pub newest_entry: Option<Instant>,
}

/// Bounded LRU cache of derived keys.
pub struct KeyCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    config: KeyCacheConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl KeyCache {
    pub fn new(config: KeyCacheConfig) -> Self {
        let entries = Arc::new(Mutex::new(HashMap::new()));

        // The sweep needs a tokio runtime; without one, lookup-time
        // expiry checks still enforce the same bounds.
        let sweeper = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let entries = Arc::clone(&entries);
            let config = config.clone();
            handle.spawn(async move {
                loop {
                    tokio::time::sleep(config.sweep_interval).await;
                    let now = Instant::now();
                    let mut map = entries.lock().unwrap();
                    let before = map.len();
                    map.retain(|_, entry: &mut CacheEntry| entry.is_valid(&config, now));
                    if map.len() < before {
                        debug!(evicted = before - map.len(), "Key cache sweep evicted expired entries");
                    }
                }
            })
        });

        Self {
            entries,
            config,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Fetch the derived key for (password, salt), deriving on a miss.
    ///
    /// A hit refreshes the entry's last-accessed time and access count —
    /// this is what makes the LRU ordering track real use. Only fails if
    /// the underlying derivation fails.
    pub fn get_key(&self, password: &str, salt: &[u8], kdf: &KdfConfig) -> VaultResult<DerivedKey> {
        let cache_key = Self::cache_key(password, salt, kdf);
        let now = Instant::now();

        {
            let mut map = self.entries.lock().unwrap();
            match map.get_mut(&cache_key) {
                Some(entry) if entry.is_valid(&self.config, now) => {
                    entry.last_accessed_at = now;
                    entry.access_count += 1;
                    return Ok(Zeroizing::new(*entry.key));
                }
                Some(_) => {
                    // Expired between sweeps; treat as a miss.
                    map.remove(&cache_key);
                }
                None => {}
            }
        }

        let key = crypto::derive_key(password, salt, kdf)?;

        let mut map = self.entries.lock().unwrap();
        if map.len() >= self.config.max_entries {
            Self::evict_lru(&mut map);
        }
        map.insert(
            cache_key,
            CacheEntry {
                key: Zeroizing::new(*key),
                created_at: now,
                last_accessed_at: now,
                access_count: 1,
            },
        );

        Ok(key)
    }

    /// Remove one entry if present; no-op otherwise.
    pub fn invalidate(&self, password: &str, salt: &[u8], kdf: &KdfConfig) {
        let cache_key = Self::cache_key(password, salt, kdf);
        self.entries.lock().unwrap().remove(&cache_key);
    }

    /// Clear all entries. Keys are zeroed as they drop.
    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.entries.lock().unwrap();
        let mut total_access_count = 0;
        let mut oldest_entry: Option<Instant> = None;
        let mut newest_entry: Option<Instant> = None;

        for entry in map.values() {
            total_access_count += entry.access_count;
            if oldest_entry.map_or(true, |t| entry.created_at < t) {
                oldest_entry = Some(entry.created_at);
            }
            if newest_entry.map_or(true, |t| entry.created_at > t) {
                newest_entry = Some(entry.created_at);
            }
        }

        CacheStats {
            size: map.len(),
            total_access_count,
            oldest_entry,
            newest_entry,
        }
    }

    /// Clear all entries and stop the sweep. Safe to call repeatedly.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        self.invalidate_all();
    }

    fn cache_key(password: &str, salt: &[u8], kdf: &KdfConfig) -> String {
        // Digest covers the KDF parameters too: the same password + salt
        // under different costs must not alias to the same derived key.
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(salt);
        hasher.update(kdf.algorithm.as_bytes());
        hasher.update(kdf.memory_kib.to_le_bytes());
        hasher.update(kdf.time_cost.to_le_bytes());
        hasher.update(kdf.parallelism.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    fn evict_lru(map: &mut HashMap<String, CacheEntry>) {
        let lru = map
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_at)
            .map(|(k, _)| k.clone());
        if let Some(k) = lru {
            map.remove(&k);
            debug!("Key cache evicted least-recently-used entry");
        }
    }
}

impl Drop for KeyCache {
    fn drop(&mut self) {
        self.destroy();
    }
}
