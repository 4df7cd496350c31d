//! Backup manager — timestamped snapshots of the vault file.
//!
//! Backups land in a configured directory as
//! `<basename>.<timestamp>.backup`, carry the same owner-only
//! permissions as the source, and are rotated down to a retention cap.
//! Rotation is deliberately not transactional with creation: a crash in
//! between leaves extra backups, never corruption.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{VaultError, VaultResult};

/// Default number of backups kept per vault basename.
pub const MAX_BACKUPS: usize = 5;

/// Descriptor for one existing backup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub created_at: SystemTime,
    pub size: u64,
}

pub struct BackupManager {
    backup_dir: PathBuf,
    max_backups: usize,
}

impl BackupManager {
    pub fn new(backup_dir: PathBuf) -> Self {
        Self {
            backup_dir,
            max_backups: MAX_BACKUPS,
        }
    }

    pub fn with_max_backups(backup_dir: PathBuf, max_backups: usize) -> Self {
        Self {
            backup_dir,
            max_backups,
        }
    }

    /// The default backup location, alongside the rest of the vault
    /// state under the home directory.
    pub fn default_backup_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lockbox")
            .join("vault-backups")
    }

    /// Copy the vault file into the backup directory, then rotate old
    /// backups past the cap. Creates the backup directory if missing.
    pub fn create_backup(&self, file_path: &Path) -> VaultResult<PathBuf> {
        if !file_path.exists() {
            return Err(VaultError::FileNotFound(file_path.to_path_buf()));
        }

        let original_name = file_name(file_path)?;
        // Microsecond precision keeps rapid successive backups distinct.
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%6f");
        let backup_path = self
            .backup_dir
            .join(format!("{original_name}.{timestamp}.backup"));

        fs::create_dir_all(&self.backup_dir)?;
        fs::copy(file_path, &backup_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&backup_path, fs::Permissions::from_mode(0o600))?;
        }

        info!(backup = %backup_path.display(), "Vault backup created");
        self.rotate(&original_name);

        Ok(backup_path)
    }

    /// Existing backups for a vault basename, newest first. A missing
    /// backup directory is an empty list, not an error.
    pub fn list_backups(&self, original_name: &str) -> Vec<BackupInfo> {
        let Ok(dir) = fs::read_dir(&self.backup_dir) else {
            return Vec::new();
        };

        let prefix = format!("{original_name}.");
        let mut backups: Vec<BackupInfo> = dir
            .flatten()
            .filter_map(|dent| {
                let name = dent.file_name().to_string_lossy().into_owned();
                if !name.starts_with(&prefix) || !name.ends_with(".backup") {
                    return None;
                }
                let meta = dent.metadata().ok()?;
                Some(BackupInfo {
                    path: dent.path(),
                    created_at: meta.modified().ok()?,
                    size: meta.len(),
                })
            })
            .collect();

        // Filename timestamps break mtime ties within one clock granule.
        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        backups
    }

    /// Newest backup for a vault basename, if any.
    pub fn latest_backup(&self, original_name: &str) -> Option<BackupInfo> {
        self.list_backups(original_name).into_iter().next()
    }

    /// Copy a backup's content over the target path, preserving
    /// owner-only permissions. Fails if the backup does not exist.
    pub fn restore(&self, backup_path: &Path, target_path: &Path) -> VaultResult<()> {
        if !backup_path.exists() {
            return Err(VaultError::FileNotFound(backup_path.to_path_buf()));
        }
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(backup_path, target_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target_path, fs::Permissions::from_mode(0o600))?;
        }

        info!(
            backup = %backup_path.display(),
            target = %target_path.display(),
            "Vault restored from backup"
        );
        Ok(())
    }

    /// Delete oldest backups until at or under the cap. Deletion
    /// failures are logged and skipped, not raised.
    fn rotate(&self, original_name: &str) {
        let backups = self.list_backups(original_name);
        if backups.len() <= self.max_backups {
            return;
        }
        for stale in &backups[self.max_backups..] {
            match fs::remove_file(&stale.path) {
                Ok(()) => debug!(backup = %stale.path.display(), "Rotated out old backup"),
                Err(e) => warn!(backup = %stale.path.display(), error = %e, "Failed to delete old backup"),
            }
        }
    }
}

fn file_name(path: &Path) -> VaultResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| VaultError::FileNotFound(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BackupManager, PathBuf) {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));
        let vault_path = dir.path().join("vault.json");
        fs::write(&vault_path, r#"{"version":1}"#).unwrap();
        (dir, manager, vault_path)
    }

    #[test]
    fn test_create_backup_copies_content() {
        let (_dir, manager, vault_path) = setup();

        let backup_path = manager.create_backup(&vault_path).unwrap();
        assert!(backup_path.exists());
        assert_eq!(
            fs::read_to_string(&backup_path).unwrap(),
            r#"{"version":1}"#
        );

        let name = backup_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("vault.json."));
        assert!(name.ends_with(".backup"));
    }

    #[test]
    fn test_create_backup_missing_source_fails() {
        let (dir, manager, _) = setup();
        let err = manager.create_backup(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, VaultError::FileNotFound(_)));
    }

    #[test]
    fn test_backup_has_owner_only_permissions() {
        let (_dir, manager, vault_path) = setup();
        let backup_path = manager.create_backup(&vault_path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&backup_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_rotation_keeps_newest_at_cap() {
        let (_dir, manager, vault_path) = setup();

        let mut created = Vec::new();
        for i in 0..7 {
            fs::write(&vault_path, format!(r#"{{"version":1,"gen":{i}}}"#)).unwrap();
            created.push(manager.create_backup(&vault_path).unwrap());
            std::thread::sleep(Duration::from_millis(5));
        }

        let remaining = manager.list_backups("vault.json");
        assert_eq!(remaining.len(), MAX_BACKUPS);

        // The newest backup must survive rotation.
        let newest = created.last().unwrap();
        assert!(remaining.iter().any(|b| &b.path == newest));
        // The oldest two were rotated out.
        assert!(!created[0].exists());
        assert!(!created[1].exists());
    }

    #[test]
    fn test_list_backups_sorted_newest_first() {
        let (_dir, manager, vault_path) = setup();
        for _ in 0..3 {
            manager.create_backup(&vault_path).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }

        let backups = manager.list_backups("vault.json");
        assert_eq!(backups.len(), 3);
        assert!(backups[0].created_at >= backups[1].created_at);
        assert!(backups[1].created_at >= backups[2].created_at);
    }

    #[test]
    fn test_list_backups_empty_when_dir_missing() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path().join("never-created"));
        assert!(manager.list_backups("vault.json").is_empty());
        assert!(manager.latest_backup("vault.json").is_none());
    }

    #[test]
    fn test_list_backups_ignores_other_basenames() {
        let (dir, manager, vault_path) = setup();
        let other = dir.path().join("other.json");
        fs::write(&other, "{}").unwrap();

        manager.create_backup(&vault_path).unwrap();
        manager.create_backup(&other).unwrap();

        assert_eq!(manager.list_backups("vault.json").len(), 1);
        assert_eq!(manager.list_backups("other.json").len(), 1);
    }

    #[test]
    fn test_restore_overwrites_target() {
        let (_dir, manager, vault_path) = setup();
        let backup_path = manager.create_backup(&vault_path).unwrap();

        fs::write(&vault_path, "trashed").unwrap();
        manager.restore(&backup_path, &vault_path).unwrap();
        assert_eq!(
            fs::read_to_string(&vault_path).unwrap(),
            r#"{"version":1}"#
        );
    }

    #[test]
    fn test_restore_missing_backup_fails() {
        let (dir, manager, vault_path) = setup();
        let err = manager
            .restore(&dir.path().join("nope.backup"), &vault_path)
            .unwrap_err();
        assert!(matches!(err, VaultError::FileNotFound(_)));
    }

    #[test]
    fn test_latest_backup_returns_newest() {
        let (_dir, manager, vault_path) = setup();
        for _ in 0..2 {
            manager.create_backup(&vault_path).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        let latest = manager.latest_backup("vault.json").unwrap();
        let all = manager.list_backups("vault.json");
        assert_eq!(latest, all[0]);
    }
}
