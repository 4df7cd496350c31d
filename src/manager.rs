//! Password manager — the stateful session guard over the crypto core.
//!
//! Two states: Locked (initial) and Unlocked. Unlocking derives (or
//! fetches from the key cache) a session key for this manager's salt;
//! locking zeroizes it. An inactivity timer auto-locks the session:
//! every successful encrypt/decrypt pushes the deadline forward, and a
//! single background task sleeps until the deadline passes.
//!
//! The stateless per-call path for non-interactive use lives in
//! [`crate::storage`]; this type is the interactive counterpart.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cache::{KeyCache, KeyCacheConfig};
use crate::crypto::{self, DerivedKey, EncryptedData, KdfConfig, SALT_SIZE};
use crate::error::{VaultError, VaultResult};

/// Session guard configuration. Default inactivity timeout is 15
/// minutes; a zero `auto_lock` disables the timer entirely.
#[derive(Debug, Clone)]
pub struct PasswordManagerConfig {
    pub auto_lock: Duration,
    pub cache: KeyCacheConfig,
    pub kdf: KdfConfig,
}

impl Default for PasswordManagerConfig {
    fn default() -> Self {
        Self {
            auto_lock: Duration::from_secs(15 * 60),
            cache: KeyCacheConfig::default(),
            kdf: KdfConfig::default(),
        }
    }
}

/// Held only while unlocked. The password stays resident because
/// decrypting a blob carrying a foreign salt requires re-derivation;
/// both fields are zeroed when the session drops.
struct Session {
    password: Zeroizing<String>,
    key: DerivedKey,
}

/// The session guard. At most one active derived key; locked until
/// [`unlock`](Self::unlock) succeeds.
pub struct PasswordManager {
    session: Arc<Mutex<Option<Session>>>,
    deadline: Arc<Mutex<Option<Instant>>>,
    salt: Mutex<[u8; SALT_SIZE]>,
    cache: KeyCache,
    config: PasswordManagerConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PasswordManager {
    /// Create a locked manager with a fresh random salt.
    pub fn new(config: PasswordManagerConfig) -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            deadline: Arc::new(Mutex::new(None)),
            salt: Mutex::new(crypto::generate_salt()),
            cache: KeyCache::new(config.cache.clone()),
            config,
            timer: Mutex::new(None),
        }
    }

    /// Unlock with the master password. Idempotent: a second call on an
    /// unlocked manager is a no-op and does not re-derive.
    pub fn unlock(&self, password: &str) -> VaultResult<()> {
        {
            let mut session = self.session.lock().unwrap();
            if session.is_some() {
                return Ok(());
            }
            let salt = *self.salt.lock().unwrap();
            let key = self.cache.get_key(password, &salt, &self.config.kdf)?;
            *session = Some(Session {
                password: Zeroizing::new(password.to_owned()),
                key,
            });
        }
        self.arm_timer();
        info!("Vault unlocked");
        Ok(())
    }

    /// Zero and discard the session key, cancel the timer. No-op when
    /// already locked.
    pub fn lock(&self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
        *self.deadline.lock().unwrap() = None;
        if self.session.lock().unwrap().take().is_some() {
            info!("Vault locked");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    pub fn is_locked(&self) -> bool {
        !self.is_unlocked()
    }

    /// Encrypt under the session key with a fresh IV. Counts as
    /// activity for the auto-lock timer.
    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<EncryptedData> {
        let (key, salt) = {
            let guard = self.session.lock().unwrap();
            let session = guard.as_ref().ok_or(VaultError::Locked)?;
            (Zeroizing::new(*session.key), *self.salt.lock().unwrap())
        };

        let iv = crypto::generate_iv();
        let (ciphertext, tag) = crypto::encrypt(plaintext, key.as_ref(), &iv)?;
        self.touch();

        Ok(EncryptedData {
            ciphertext,
            iv: iv.to_vec(),
            salt: salt.to_vec(),
            tag: tag.to_vec(),
            version: 1,
        })
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt). If the
    /// blob's salt differs from the session salt (an older blob from
    /// before a password rotation, or another manager instance), the key
    /// for that salt is re-derived through the cache.
    pub fn decrypt(&self, encrypted: &EncryptedData) -> VaultResult<Zeroizing<Vec<u8>>> {
        let key = {
            let guard = self.session.lock().unwrap();
            let session = guard.as_ref().ok_or(VaultError::Locked)?;
            let session_salt = *self.salt.lock().unwrap();
            if encrypted.salt == session_salt {
                Zeroizing::new(*session.key)
            } else {
                self.cache
                    .get_key(&session.password, &encrypted.salt, &self.config.kdf)?
            }
        };

        let plaintext = crypto::decrypt(&encrypted.ciphertext, key.as_ref(), &encrypted.iv, &encrypted.tag)?;
        self.touch();
        Ok(plaintext)
    }

    /// Rotate the master password. Verifies `old_password` against the
    /// held key before any state changes (mismatch fails with the same
    /// undifferentiated decryption error), then swaps in a fresh salt
    /// and key derived from `new_password`. The manager stays Unlocked.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> VaultResult<()> {
        {
            let mut guard = self.session.lock().unwrap();
            let session = guard.as_mut().ok_or(VaultError::Locked)?;

            let salt = *self.salt.lock().unwrap();
            let old_key = crypto::derive_key(old_password, &salt, &self.config.kdf)?;
            if !crypto::secure_compare(old_key.as_ref(), session.key.as_ref()) {
                return Err(VaultError::Decryption);
            }

            let new_salt = crypto::generate_salt();
            let new_key = crypto::derive_key(new_password, &new_salt, &self.config.kdf)?;
            *session = Session {
                password: Zeroizing::new(new_password.to_owned()),
                key: new_key,
            };
            *self.salt.lock().unwrap() = new_salt;
        }

        // Old-password keys must not outlive the rotation.
        self.cache.invalidate_all();
        self.touch();
        info!("Master password rotated");
        Ok(())
    }

    /// Time until auto-lock fires, or `None` when locked (or when
    /// auto-lock is disabled). Monotone countdown between activities.
    pub fn remaining_lock_time(&self) -> Option<Duration> {
        if self.is_locked() {
            return None;
        }
        self.deadline
            .lock()
            .unwrap()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The salt the session key is derived for. Changes on password
    /// rotation.
    pub fn salt(&self) -> [u8; SALT_SIZE] {
        *self.salt.lock().unwrap()
    }

    /// Lock and release the timer and cache. Idempotent.
    pub fn destroy(&self) {
        self.lock();
        self.cache.destroy();
    }

    /// Push the auto-lock deadline forward after successful activity.
    fn touch(&self) {
        if self.config.auto_lock.is_zero() {
            return;
        }
        let mut deadline = self.deadline.lock().unwrap();
        if deadline.is_some() {
            *deadline = Some(Instant::now() + self.config.auto_lock);
        }
    }

    /// Arm the auto-lock task. One outstanding task per manager: the
    /// task re-sleeps whenever activity has moved the deadline, so
    /// refreshes never spawn anything.
    fn arm_timer(&self) {
        if self.config.auto_lock.is_zero() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime — auto-lock timer not armed");
            return;
        };

        *self.deadline.lock().unwrap() = Some(Instant::now() + self.config.auto_lock);

        let mut timer = self.timer.lock().unwrap();
        if let Some(old) = timer.take() {
            old.abort();
        }

        let session = Arc::clone(&self.session);
        let deadline = Arc::clone(&self.deadline);
        *timer = Some(handle.spawn(async move {
            loop {
                let next = *deadline.lock().unwrap();
                let Some(next) = next else { break };

                if Instant::now() >= next {
                    *deadline.lock().unwrap() = None;
                    if session.lock().unwrap().take().is_some() {
                        info!("Inactivity timeout elapsed — vault auto-locked");
                    }
                    break;
                }
                tokio::time::sleep_until(next.into()).await;
            }
        }));
    }
}

impl Drop for PasswordManager {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
        // Session and cache zeroize through their own drops.
    }
}
