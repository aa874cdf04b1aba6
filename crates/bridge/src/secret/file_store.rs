// SPDX-License-Identifier: Apache-2.0

//! Fallback secret store: a single restrictive-permission file under the
//! bridge's machine-wide data directory, written atomically (write-tmp +
//! rename), matching `config::Config::save`'s durability discipline.

use std::path::{Path, PathBuf};

use super::SecretStore;
use crate::model::DeviceIdentity;

const FILE_NAME: &str = "identity.json";
/// Legacy per-user location from older builds; migrated in on first start.
const LEGACY_HOME_SUBPATH: &str = ".repset-bridge/identity.json";

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: &Path) -> Self {
        let store = Self { path: data_dir.join(FILE_NAME) };
        store.migrate_from_legacy_location();
        store
    }

    /// One-way upgrade: if a machine-wide identity doesn't exist yet but a
    /// legacy per-user one does, adopt it and leave the legacy file alone
    /// (spec §4.8 ambient supplement — no destructive migration).
    fn migrate_from_legacy_location(&self) {
        if self.path.exists() {
            return;
        }
        let Some(home) = std::env::var_os("HOME") else { return };
        let legacy = PathBuf::from(home).join(LEGACY_HOME_SUBPATH);
        if !legacy.exists() {
            return;
        }
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::read_to_string(&legacy) {
            Ok(contents) => {
                if std::fs::write(&self.path, &contents).is_ok() {
                    tracing::info!(from = %legacy.display(), to = %self.path.display(), "migrated device identity to machine-wide store");
                    Self::restrict_permissions(&self.path);
                }
            }
            Err(err) => tracing::warn!(%err, "failed to read legacy identity file for migration"),
        }
    }

    #[cfg(unix)]
    fn restrict_permissions(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }
    }

    #[cfg(not(unix))]
    fn restrict_permissions(_path: &Path) {}
}

impl SecretStore for FileStore {
    fn load(&self) -> anyhow::Result<Option<DeviceIdentity>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, identity: &DeviceIdentity) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(identity)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Self::restrict_permissions(&self.path);
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "dev-1".into(),
            hmac_key: "key".into(),
            server_url: "https://cloud.example".into(),
            paired_at: 1,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        store.save(&identity()).expect("save");
        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded.device_id, "dev-1");
    }

    #[test]
    fn clear_removes_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        store.save(&identity()).expect("save");
        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn load_without_prior_save_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        assert!(store.load().expect("load").is_none());
    }
}
