//! Error types for vault operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the vault, its session guard, and the crypto layer.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault is locked — call unlock() first")]
    Locked,

    #[error("Vault file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Vault file corrupted: {0}")]
    Corrupted(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Entry already exists: {0}")]
    DuplicateEntry(String),

    /// Wrong key, tampered ciphertext, or tampered tag. Deliberately one
    /// undifferentiated kind — callers must not learn which check failed.
    #[error("Decryption failed")]
    Decryption,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unsupported vault version: {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {got}")]
    InvalidIvLength { expected: usize, got: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;
