//! Lockbox — local password-protected secret store.
//!
//! A durable container of named credentials (API keys, tokens, notes)
//! encrypted at rest with AES-256-GCM under a key derived from a single
//! master password via Argon2id. Includes disaster-recovery backups and
//! tamper detection.
//!
//! Two independent ways to use the crypto core:
//! - [`storage::VaultStorage`] — stateless per call, password supplied
//!   as an explicit argument each time; safe for non-interactive and
//!   multi-process use.
//! - [`manager::PasswordManager`] — a lock/unlock session guard with an
//!   inactivity auto-lock timer, for interactive sessions.
//!
//! Security:
//! - Entries encrypted at rest (AES-256-GCM + Argon2id), one IV per entry
//! - Derived keys and plaintext buffers zeroized after use
//! - Wrong password, tampered ciphertext, and tampered tag are one
//!   undifferentiated decryption failure
//! - Vault and backup files written with 0600 permissions

pub mod backup;
pub mod cache;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod storage;

pub use backup::{BackupInfo, BackupManager, MAX_BACKUPS};
pub use cache::{CacheStats, KeyCache, KeyCacheConfig};
pub use crypto::{EncryptedData, EncryptedDataText, KdfConfig};
pub use error::{VaultError, VaultResult};
pub use manager::{PasswordManager, PasswordManagerConfig};
pub use storage::{
    DecryptedEntry, EntryData, EntryMetadata, EntryPatch, EntryType, IntegrityReport, Vault,
    VaultEntry, VaultMetadata, VaultStorage, VAULT_FORMAT_VERSION,
};
