// SPDX-License-Identifier: Apache-2.0

//! Secret Store (component H, spec §4.8): persists the paired [`DeviceIdentity`]
//! behind whatever credential facility the host offers, falling back to a
//! restrictive-permission file when none is available.

pub mod file_store;
pub mod keyring_store;

use crate::model::DeviceIdentity;

/// Storage abstraction so the rest of the bridge never cares whether the
/// identity lives in an OS keyring or a file on disk.
pub trait SecretStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<DeviceIdentity>>;
    fn save(&self, identity: &DeviceIdentity) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Try the OS keyring first; fall back to the encrypted file store if the
/// platform has no credential facility available (common on minimal Linux
/// hosts without a running secret service).
pub fn open(data_dir: &std::path::Path) -> Box<dyn SecretStore> {
    let keyring = keyring_store::KeyringStore::new();
    match keyring.probe() {
        Ok(()) => Box::new(keyring),
        Err(err) => {
            tracing::warn!(%err, "OS keyring unavailable, falling back to file-backed secret store");
            Box::new(file_store::FileStore::new(data_dir))
        }
    }
}
