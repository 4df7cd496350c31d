//! Crypto primitives — Argon2id key derivation and AES-256-GCM.
//!
//! Stateless building blocks shared by the session guard and the storage
//! layer. All key material lives in `Zeroizing` buffers and is wiped when
//! dropped; decrypted plaintext is returned zeroizing for the same reason.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
/// AES-GCM nonce size in bytes.
pub const IV_SIZE: usize = 12;
/// Argon2 salt size in bytes.
pub const SALT_SIZE: usize = 32;
/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// A derived 256-bit key, zeroed on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_SIZE]>;

/// Argon2id cost parameters.
///
/// Defaults follow the interactive-use recommendation: 64 MiB memory,
/// 3 iterations, 4 lanes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfConfig {
    pub algorithm: String,
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: "argon2id".into(),
            memory_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// Deterministic: the same password + salt + config always yields the
/// same key. Fails with `UnsupportedAlgorithm` for anything other than
/// `argon2id` — the algorithm pair is fixed, not pluggable.
pub fn derive_key(password: &str, salt: &[u8], config: &KdfConfig) -> VaultResult<DerivedKey> {
    if config.algorithm != "argon2id" {
        return Err(VaultError::UnsupportedAlgorithm(config.algorithm.clone()));
    }

    let params = Params::new(
        config.memory_kib,
        config.time_cost,
        config.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    Ok(key)
}

/// Generate a cryptographically random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a cryptographically random IV (GCM nonce).
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt plaintext with AES-256-GCM. Returns ciphertext and the
/// detached 16-byte authentication tag.
///
/// Key and IV lengths are validated before any cipher work.
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> VaultResult<(Vec<u8>, [u8; TAG_SIZE])> {
    validate_lengths(key, iv)?;

    let cipher = Aes256Gcm::new_from_slice(key).expect("key length validated");
    let nonce = Nonce::from_slice(iv);

    // aes-gcm appends the tag to the ciphertext; split it back off.
    let mut combined = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-GCM encryption failed");

    let split = combined.len() - TAG_SIZE;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&combined[split..]);
    combined.truncate(split);

    Ok((combined, tag))
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// Wrong key, tampered ciphertext, and tampered tag all fail with the
/// same `Decryption` error — the cause is never distinguished.
pub fn decrypt(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
    tag: &[u8],
) -> VaultResult<Zeroizing<Vec<u8>>> {
    validate_lengths(key, iv)?;

    let cipher = Aes256Gcm::new_from_slice(key).expect("key length validated");
    let nonce = Nonce::from_slice(iv);

    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let plaintext = cipher
        .decrypt(nonce, combined.as_slice())
        .map_err(|_| VaultError::Decryption)?;

    Ok(Zeroizing::new(plaintext))
}

fn validate_lengths(key: &[u8], iv: &[u8]) -> VaultResult<()> {
    if key.len() != KEY_SIZE {
        return Err(VaultError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: key.len(),
        });
    }
    if iv.len() != IV_SIZE {
        return Err(VaultError::InvalidIvLength {
            expected: IV_SIZE,
            got: iv.len(),
        });
    }
    Ok(())
}

/// Overwrite a buffer with zeros in place.
pub fn secure_clear(buffer: &mut [u8]) {
    use zeroize::Zeroize;
    buffer.zeroize();
}

/// Constant-time equality. A length mismatch returns false immediately
/// (the length leak is unavoidable); content comparison never
/// short-circuits.
pub fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ── Encrypted Blob Serialization ────────────────────────────────────

/// An encrypted blob with everything needed to decrypt it later
/// (given the password).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
    pub tag: Vec<u8>,
    pub version: u32,
}

/// Text form of [`EncryptedData`] — base64 fields, safe for JSON storage
/// or transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedDataText {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub tag: String,
    pub version: u32,
}

/// Encode an encrypted blob into its base64 text form.
pub fn serialize_encrypted_data(data: &EncryptedData) -> EncryptedDataText {
    EncryptedDataText {
        ciphertext: BASE64.encode(&data.ciphertext),
        iv: BASE64.encode(&data.iv),
        salt: BASE64.encode(&data.salt),
        tag: BASE64.encode(&data.tag),
        version: data.version,
    }
}

/// Decode the base64 text form back into an encrypted blob.
pub fn deserialize_encrypted_data(text: &EncryptedDataText) -> VaultResult<EncryptedData> {
    let decode = |field: &str, value: &str| {
        BASE64
            .decode(value)
            .map_err(|_| VaultError::Corrupted(format!("invalid base64 in {field}")))
    };
    Ok(EncryptedData {
        ciphertext: decode("ciphertext", &text.ciphertext)?,
        iv: decode("iv", &text.iv)?,
        salt: decode("salt", &text.salt)?,
        tag: decode("tag", &text.tag)?,
        version: text.version,
    })
}

/// Serde helper for byte fields stored as base64 strings in the vault
/// file.
pub(crate) mod b64 {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(&s).map_err(serde::de::Error::custom)
    }
}
