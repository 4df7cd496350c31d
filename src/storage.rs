//! Vault storage — the persistent container and entry CRUD.
//!
//! Stateless per call: every operation takes the master password as an
//! explicit argument, which keeps this path safe for non-interactive and
//! multi-process use (the interactive session guard is
//! [`crate::manager::PasswordManager`]). Entries stay encrypted in
//! memory; a wrong password only surfaces when an entry is actually
//! decrypted, never at load time.
//!
//! On-disk format: JSON with camelCase keys and base64 byte fields,
//! written atomically with owner-only (0600) permissions.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::{BackupInfo, BackupManager};
use crate::cache::{KeyCache, KeyCacheConfig};
use crate::crypto::{self, b64, KdfConfig};
use crate::error::{VaultError, VaultResult};

/// Current vault file format version.
pub const VAULT_FORMAT_VERSION: u32 = 1;

/// The fixed algorithm pair. Not pluggable.
pub const VAULT_ALGORITHM: &str = "argon2id+aes-256-gcm";

// ── Data Model ──────────────────────────────────────────────────────

/// Vault-wide key derivation metadata. Immutable after creation except
/// through explicit password rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultMetadata {
    pub algorithm: String,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
}

/// What kind of secret an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    Credential,
    ApiKey,
    Token,
    Note,
}

/// A single encrypted entry. `encrypted_data`/`iv`/`tag` hold the AEAD
/// output for the entry's plaintext JSON payload; every entry gets its
/// own IV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub name: String,
    #[serde(with = "b64")]
    pub encrypted_data: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// The in-memory vault. Mutated in place by storage operations;
/// persisted only by an explicit [`VaultStorage::save`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub version: u32,
    pub metadata: VaultMetadata,
    pub entries: Vec<VaultEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`VaultStorage::add_entry`]. `id` is caller-suppliable;
/// omitted ids are generated.
#[derive(Debug, Clone)]
pub struct EntryData {
    pub id: Option<String>,
    pub entry_type: EntryType,
    pub name: String,
    pub data: serde_json::Value,
}

/// A decrypted entry, returned by [`VaultStorage::get_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedEntry {
    pub id: String,
    pub entry_type: EntryType,
    pub name: String,
    pub data: serde_json::Value,
}

/// Patch for [`VaultStorage::update_entry`]. A `name` change is
/// plaintext-only; a `data` change re-encrypts with a fresh IV.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub name: Option<String>,
    pub data: Option<serde_json::Value>,
}

/// Non-secret entry fields. Deliberately has no ciphertext, IV, tag, or
/// key material — listing can never leak them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Diagnostic report from [`VaultStorage::verify_integrity`]. Failures
/// are aggregated, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub entry_count: usize,
    pub corrupted_entries: Vec<String>,
}

// ── Storage ─────────────────────────────────────────────────────────

/// The persistence and CRUD layer. Holds a key cache purely as an
/// optimization — behavior is identical (only slower) with the cache
/// cleared at any point — and a backup manager for snapshot/restore.
pub struct VaultStorage {
    kdf: KdfConfig,
    cache: KeyCache,
    backup: BackupManager,
}

impl Default for VaultStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultStorage {
    /// Storage with default KDF parameters and the default backup
    /// directory under the home dir.
    pub fn new() -> Self {
        Self::with_config(KdfConfig::default(), BackupManager::default_backup_dir())
    }

    pub fn with_config(kdf: KdfConfig, backup_dir: PathBuf) -> Self {
        Self {
            kdf,
            cache: KeyCache::new(KeyCacheConfig::default()),
            backup: BackupManager::new(backup_dir),
        }
    }

    /// A fresh vault: current format version, random vault-wide salt,
    /// no entries.
    pub fn create_empty_vault(&self) -> Vault {
        let now = Utc::now();
        Vault {
            version: VAULT_FORMAT_VERSION,
            metadata: VaultMetadata {
                algorithm: VAULT_ALGORITHM.into(),
                salt: crypto::generate_salt().to_vec(),
                iterations: self.kdf.time_cost,
                memory_cost: self.kdf.memory_kib,
                parallelism: self.kdf.parallelism,
            },
            entries: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Persist the vault. Creates parent directories, writes a temp
    /// file with 0600 permissions, fsyncs, then renames into place —
    /// a crash mid-write leaves either the old file or the new one.
    pub fn save(&self, path: &Path, vault: &mut Vault, _password: &str) -> VaultResult<()> {
        vault.updated_at = Utc::now();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(vault)?;
        let tmp_path = path.with_extension("vault.tmp");

        let result = (|| -> VaultResult<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            // Permissions before content.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }

            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        info!(path = %path.display(), entries = vault.entries.len(), "Vault saved");
        Ok(())
    }

    /// Load a vault from disk. Structural parse only — entries remain
    /// encrypted, so the password is not validated here; a wrong
    /// password is first detected by [`get_entry`](Self::get_entry).
    pub fn load(&self, path: &Path, _password: &str) -> VaultResult<Vault> {
        if !path.exists() {
            return Err(VaultError::FileNotFound(path.to_path_buf()));
        }
        let data = fs::read_to_string(path)?;
        read_vault(&data)
    }

    /// Encrypt and append a new entry. The ciphertext is fully computed
    /// before the entries collection is touched.
    pub fn add_entry(
        &self,
        vault: &mut Vault,
        entry_data: EntryData,
        password: &str,
    ) -> VaultResult<VaultEntry> {
        if let Some(id) = &entry_data.id {
            if vault.entries.iter().any(|e| &e.id == id) {
                return Err(VaultError::DuplicateEntry(id.clone()));
            }
        }

        let key = self.vault_key(vault, password)?;
        let iv = crypto::generate_iv();
        let plaintext = serde_json::to_vec(&entry_data.data)?;
        let (ciphertext, tag) = crypto::encrypt(&plaintext, key.as_ref(), &iv)?;

        let id = entry_data
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let entry = VaultEntry {
            id,
            entry_type: entry_data.entry_type,
            name: entry_data.name,
            encrypted_data: ciphertext,
            iv: iv.to_vec(),
            tag: tag.to_vec(),
            created_at: now,
            updated_at: now,
            access_count: 0,
            last_accessed_at: None,
        };

        vault.entries.push(entry.clone());
        info!(entry_id = %entry.id, "Entry added to vault");
        Ok(entry)
    }

    /// Decrypt one entry. Bumps the stored entry's access count and
    /// last-accessed time as a side effect of the successful decrypt.
    pub fn get_entry(
        &self,
        vault: &mut Vault,
        id: &str,
        password: &str,
    ) -> VaultResult<DecryptedEntry> {
        let key = self.vault_key(vault, password)?;

        let entry = vault
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_owned()))?;

        let plaintext = crypto::decrypt(&entry.encrypted_data, key.as_ref(), &entry.iv, &entry.tag)?;
        let data: serde_json::Value = serde_json::from_slice(&plaintext)
            .map_err(|_| VaultError::Corrupted(format!("entry {id} payload is not valid JSON")))?;

        entry.access_count += 1;
        entry.last_accessed_at = Some(Utc::now());

        Ok(DecryptedEntry {
            id: entry.id.clone(),
            entry_type: entry.entry_type,
            name: entry.name.clone(),
            data,
        })
    }

    /// Patch an entry. A `data` change re-encrypts under a fresh IV,
    /// replacing ciphertext, IV, and tag.
    pub fn update_entry(
        &self,
        vault: &mut Vault,
        id: &str,
        patch: EntryPatch,
        password: &str,
    ) -> VaultResult<VaultEntry> {
        // Resolve the key before taking the mutable borrow.
        let key = match patch.data {
            Some(_) => Some(self.vault_key(vault, password)?),
            None => None,
        };

        let entry = vault
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_owned()))?;

        if let Some(name) = patch.name {
            entry.name = name;
        }

        if let Some(data) = patch.data {
            let key = key.expect("key resolved when data patch present");
            let iv = crypto::generate_iv();
            let plaintext = serde_json::to_vec(&data)?;
            let (ciphertext, tag) = crypto::encrypt(&plaintext, key.as_ref(), &iv)?;
            entry.encrypted_data = ciphertext;
            entry.iv = iv.to_vec();
            entry.tag = tag.to_vec();
        }

        entry.updated_at = Utc::now();
        info!(entry_id = %id, "Entry updated");
        Ok(entry.clone())
    }

    /// Remove an entry. No password needed — nothing is decrypted.
    pub fn delete_entry(&self, vault: &mut Vault, id: &str) -> VaultResult<()> {
        let index = vault
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_owned()))?;
        vault.entries.remove(index);
        info!(entry_id = %id, "Entry removed from vault");
        Ok(())
    }

    /// All entries' non-secret fields.
    pub fn list_entries(&self, vault: &Vault) -> Vec<EntryMetadata> {
        vault
            .entries
            .iter()
            .map(|e| EntryMetadata {
                id: e.id.clone(),
                entry_type: e.entry_type,
                name: e.name.clone(),
                created_at: e.created_at,
                updated_at: e.updated_at,
                access_count: e.access_count,
                last_accessed_at: e.last_accessed_at,
            })
            .collect()
    }

    /// Structural checks always; with a password, additionally attempts
    /// to decrypt every entry and records failures. Diagnostic only —
    /// nothing is mutated and nothing is raised.
    pub fn verify_integrity(&self, vault: &Vault, password: Option<&str>) -> IntegrityReport {
        let mut report = IntegrityReport {
            valid: true,
            errors: Vec::new(),
            entry_count: vault.entries.len(),
            corrupted_entries: Vec::new(),
        };

        if vault.version != VAULT_FORMAT_VERSION {
            report.valid = false;
            report.errors.push(format!(
                "Unsupported vault version: {} (expected {})",
                vault.version, VAULT_FORMAT_VERSION
            ));
        }

        if vault.metadata.salt.is_empty() {
            report.valid = false;
            report.errors.push("Missing vault salt".into());
        }

        if vault.metadata.algorithm != VAULT_ALGORITHM {
            report.valid = false;
            report.errors.push(format!(
                "Unsupported algorithm: {}",
                vault.metadata.algorithm
            ));
        }

        if let Some(password) = password {
            match self.vault_key(vault, password) {
                Ok(key) => {
                    for entry in &vault.entries {
                        if crypto::decrypt(&entry.encrypted_data, key.as_ref(), &entry.iv, &entry.tag)
                            .is_err()
                        {
                            report.valid = false;
                            report.corrupted_entries.push(entry.id.clone());
                        }
                    }
                }
                Err(e) => {
                    report.valid = false;
                    report.errors.push(format!("Key derivation failed: {e}"));
                }
            }
            if !report.corrupted_entries.is_empty() {
                warn!(
                    corrupted = report.corrupted_entries.len(),
                    "Integrity check found undecryptable entries"
                );
            }
        }

        report
    }

    /// Snapshot the vault file into the backup directory.
    pub fn create_backup(&self, path: &Path) -> VaultResult<PathBuf> {
        self.backup.create_backup(path)
    }

    /// Overwrite the live file at `target_path` with the backup's
    /// content and return the restored vault.
    pub fn restore_from_backup(&self, backup_path: &Path, target_path: &Path) -> VaultResult<Vault> {
        self.backup.restore(backup_path, target_path)?;
        let data = fs::read_to_string(target_path)?;
        read_vault(&data)
    }

    /// Backups available for a vault file, newest first.
    pub fn list_backups(&self, original_name: &str) -> Vec<BackupInfo> {
        self.backup.list_backups(original_name)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Resolve the key for this vault's salt under the vault's own KDF
    /// parameters (not the storage defaults), via the cache.
    fn vault_key(&self, vault: &Vault, password: &str) -> VaultResult<crypto::DerivedKey> {
        if vault.metadata.algorithm != VAULT_ALGORITHM {
            return Err(VaultError::UnsupportedAlgorithm(
                vault.metadata.algorithm.clone(),
            ));
        }
        let kdf = KdfConfig {
            algorithm: "argon2id".into(),
            memory_kib: vault.metadata.memory_cost,
            time_cost: vault.metadata.iterations,
            parallelism: vault.metadata.parallelism,
        };
        self.cache.get_key(password, &vault.metadata.salt, &kdf)
    }
}

/// Parse and structurally validate a vault file. Unsupported versions
/// are rejected here; nothing is decrypted.
fn read_vault(data: &str) -> VaultResult<Vault> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|_| VaultError::Corrupted("invalid JSON".into()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| VaultError::Corrupted("vault is not an object".into()))?;
    let version = obj
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| VaultError::Corrupted("missing or invalid version".into()))?;
    if !obj.get("metadata").is_some_and(|m| m.is_object()) {
        return Err(VaultError::Corrupted("missing or invalid metadata".into()));
    }
    if !obj.get("entries").is_some_and(|e| e.is_array()) {
        return Err(VaultError::Corrupted("missing or invalid entries array".into()));
    }

    if version != u64::from(VAULT_FORMAT_VERSION) {
        return Err(VaultError::UnsupportedVersion {
            found: version as u32,
            expected: VAULT_FORMAT_VERSION,
        });
    }

    serde_json::from_value(value).map_err(|e| VaultError::Corrupted(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fast_kdf() -> KdfConfig {
        KdfConfig {
            memory_kib: 1024,
            time_cost: 1,
            parallelism: 1,
            ..KdfConfig::default()
        }
    }

    fn storage(dir: &TempDir) -> VaultStorage {
        VaultStorage::with_config(fast_kdf(), dir.path().join("backups"))
    }

    fn api_key_entry(id: Option<&str>) -> EntryData {
        EntryData {
            id: id.map(str::to_owned),
            entry_type: EntryType::ApiKey,
            name: "OpenAI".into(),
            data: json!({ "key": "sk-x" }),
        }
    }

    #[test]
    fn test_create_empty_vault() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let vault = storage.create_empty_vault();

        assert_eq!(vault.version, VAULT_FORMAT_VERSION);
        assert_eq!(vault.metadata.algorithm, VAULT_ALGORITHM);
        assert_eq!(vault.metadata.salt.len(), crypto::SALT_SIZE);
        assert!(vault.entries.is_empty());
    }

    #[test]
    fn test_add_save_load_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("vault.json");

        let mut vault = storage.create_empty_vault();
        let entry = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();
        storage.save(&path, &mut vault, "pw").unwrap();

        let mut loaded = storage.load(&path, "pw").unwrap();
        let decrypted = storage.get_entry(&mut loaded, &entry.id, "pw").unwrap();

        assert_eq!(decrypted.name, "OpenAI");
        assert_eq!(decrypted.entry_type, EntryType::ApiKey);
        assert_eq!(decrypted.data["key"], "sk-x");
    }

    #[test]
    fn test_saved_file_has_owner_only_permissions() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("vault.json");
        let mut vault = storage.create_empty_vault();
        storage.save(&path, &mut vault, "pw").unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("nested").join("deeper").join("vault.json");
        let mut vault = storage.create_empty_vault();

        storage.save(&path, &mut vault, "pw").unwrap();
        assert!(storage.exists(&path));
    }

    #[test]
    fn test_add_entry_generates_unique_ids() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();

        let e1 = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();
        let e2 = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();
        assert!(!e1.id.is_empty());
        assert_ne!(e1.id, e2.id);
        assert_eq!(vault.entries.len(), 2);
    }

    #[test]
    fn test_add_entry_rejects_duplicate_id() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();

        storage.add_entry(&mut vault, api_key_entry(Some("dup")), "pw").unwrap();
        let err = storage.add_entry(&mut vault, api_key_entry(Some("dup")), "pw").unwrap_err();
        assert!(matches!(err, VaultError::DuplicateEntry(id) if id == "dup"));
    }

    #[test]
    fn test_get_entry_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();

        let err = storage.get_entry(&mut vault, "missing", "pw").unwrap_err();
        assert!(matches!(err, VaultError::EntryNotFound(_)));
    }

    #[test]
    fn test_get_entry_wrong_password_is_decryption_failure() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        let entry = storage.add_entry(&mut vault, api_key_entry(None), "pw-a").unwrap();

        let err = storage.get_entry(&mut vault, &entry.id, "pw-b").unwrap_err();
        assert!(matches!(err, VaultError::Decryption));
    }

    #[test]
    fn test_get_entry_bumps_access_count() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        let entry = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();
        assert_eq!(vault.entries[0].access_count, 0);
        assert!(vault.entries[0].last_accessed_at.is_none());

        storage.get_entry(&mut vault, &entry.id, "pw").unwrap();
        storage.get_entry(&mut vault, &entry.id, "pw").unwrap();
        assert_eq!(vault.entries[0].access_count, 2);
        assert!(vault.entries[0].last_accessed_at.is_some());
    }

    #[test]
    fn test_update_entry_name_keeps_ciphertext() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        let entry = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();

        let updated = storage
            .update_entry(
                &mut vault,
                &entry.id,
                EntryPatch { name: Some("Renamed".into()), data: None },
                "pw",
            )
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.encrypted_data, entry.encrypted_data);
        assert_eq!(updated.iv, entry.iv);
    }

    #[test]
    fn test_update_entry_data_reencrypts_with_fresh_iv() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        let entry = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();

        let updated = storage
            .update_entry(
                &mut vault,
                &entry.id,
                EntryPatch { name: None, data: Some(json!({ "key": "sk-y" })) },
                "pw",
            )
            .unwrap();

        assert_ne!(updated.iv, entry.iv);
        assert_ne!(updated.encrypted_data, entry.encrypted_data);

        let decrypted = storage.get_entry(&mut vault, &entry.id, "pw").unwrap();
        assert_eq!(decrypted.data["key"], "sk-y");
    }

    #[test]
    fn test_update_entry_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        let err = storage
            .update_entry(&mut vault, "missing", EntryPatch::default(), "pw")
            .unwrap_err();
        assert!(matches!(err, VaultError::EntryNotFound(_)));
    }

    #[test]
    fn test_delete_entry_lifecycle() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        let entry = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();

        storage.delete_entry(&mut vault, &entry.id).unwrap();
        assert!(vault.entries.is_empty());

        let err = storage.get_entry(&mut vault, &entry.id, "pw").unwrap_err();
        assert!(matches!(err, VaultError::EntryNotFound(_)));
        let err = storage.delete_entry(&mut vault, &entry.id).unwrap_err();
        assert!(matches!(err, VaultError::EntryNotFound(_)));
    }

    #[test]
    fn test_list_entries_exposes_metadata_only() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        storage.add_entry(&mut vault, api_key_entry(Some("one")), "pw").unwrap();
        storage
            .add_entry(
                &mut vault,
                EntryData {
                    id: Some("two".into()),
                    entry_type: EntryType::Note,
                    name: "A note".into(),
                    data: json!({ "text": "hidden" }),
                },
                "pw",
            )
            .unwrap();

        let listed = storage.list_entries(&vault);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "one");
        assert_eq!(listed[1].entry_type, EntryType::Note);

        // The serialized metadata must carry no secret material.
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("encryptedData"));
        assert!(!json.contains("iv"));
        assert!(!json.contains("tag"));
    }

    #[test]
    fn test_sequential_adds_never_lose_entries() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();

        for i in 0..10 {
            storage
                .add_entry(
                    &mut vault,
                    EntryData {
                        id: Some(format!("entry-{i}")),
                        entry_type: EntryType::Token,
                        name: format!("token {i}"),
                        data: json!({ "n": i }),
                    },
                    "pw",
                )
                .unwrap();
        }
        assert_eq!(vault.entries.len(), 10);
        for i in 0..10 {
            assert!(vault.entries.iter().any(|e| e.id == format!("entry-{i}")));
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let err = storage.load(&dir.path().join("nope.json"), "pw").unwrap_err();
        assert!(matches!(err, VaultError::FileNotFound(_)));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("garbage.json");

        fs::write(&path, "not json at all {{{").unwrap();
        assert!(matches!(
            storage.load(&path, "pw").unwrap_err(),
            VaultError::Corrupted(_)
        ));

        fs::write(&path, r#"{"version": "one"}"#).unwrap();
        assert!(matches!(
            storage.load(&path, "pw").unwrap_err(),
            VaultError::Corrupted(_)
        ));
    }

    #[test]
    fn test_load_rejects_unsupported_version() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("vault.json");

        let mut vault = storage.create_empty_vault();
        storage.save(&path, &mut vault, "pw").unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        raw["version"] = json!(99);
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let err = storage.load(&path, "pw").unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn test_verify_integrity_structural_only_without_password() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();

        let report = storage.verify_integrity(&vault, None);
        assert!(report.valid);
        assert_eq!(report.entry_count, 1);
        assert!(report.corrupted_entries.is_empty());
    }

    #[test]
    fn test_verify_integrity_flags_tampered_entry() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        let good = storage.add_entry(&mut vault, api_key_entry(Some("good")), "pw").unwrap();
        storage.add_entry(&mut vault, api_key_entry(Some("bad")), "pw").unwrap();

        let tampered = vault.entries.iter_mut().find(|e| e.id == "bad").unwrap();
        tampered.encrypted_data = b"garbage".to_vec();

        let report = storage.verify_integrity(&vault, Some("pw"));
        assert!(!report.valid);
        assert_eq!(report.entry_count, 2);
        assert_eq!(report.corrupted_entries, vec!["bad".to_string()]);
        assert!(!report.corrupted_entries.contains(&good.id));
    }

    #[test]
    fn test_verify_integrity_flags_bad_version_and_metadata() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let mut vault = storage.create_empty_vault();
        vault.version = 42;
        vault.metadata.salt.clear();

        let report = storage.verify_integrity(&vault, None);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_backup_and_restore_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("vault.json");

        let mut vault = storage.create_empty_vault();
        let entry = storage.add_entry(&mut vault, api_key_entry(None), "pw").unwrap();
        storage.save(&path, &mut vault, "pw").unwrap();

        let backup_path = storage.create_backup(&path).unwrap();
        assert!(backup_path.exists());

        // Clobber the live file, then restore.
        fs::write(&path, "trashed").unwrap();
        let mut restored = storage.restore_from_backup(&backup_path, &path).unwrap();
        let decrypted = storage.get_entry(&mut restored, &entry.id, "pw").unwrap();
        assert_eq!(decrypted.data["key"], "sk-x");
    }

    #[test]
    fn test_vault_file_uses_documented_field_names() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let path = dir.path().join("vault.json");
        let mut vault = storage.create_empty_vault();
        storage.add_entry(&mut vault, api_key_entry(Some("id-1")), "pw").unwrap();
        storage.save(&path, &mut vault, "pw").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["metadata"]["algorithm"], VAULT_ALGORITHM);
        assert!(raw["metadata"]["salt"].is_string());
        let entry = &raw["entries"][0];
        assert_eq!(entry["type"], "api-key");
        assert!(entry["encryptedData"].is_string());
        assert!(entry["iv"].is_string());
        assert!(entry["tag"].is_string());
        assert!(entry["createdAt"].is_string());
        assert_eq!(entry["accessCount"], 0);
    }
}
