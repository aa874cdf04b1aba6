// SPDX-License-Identifier: Apache-2.0

//! OS credential facility backend: Windows DPAPI / macOS Keychain / Linux
//! libsecret, all via the `keyring` crate's single cross-platform API.

use keyring::Entry;

use super::SecretStore;
use crate::model::DeviceIdentity;

const SERVICE: &str = "repset-bridge";
const USER: &str = "device-identity";

pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(&self) -> anyhow::Result<Entry> {
        Ok(Entry::new(SERVICE, USER)?)
    }

    /// Cheap round trip to confirm a credential facility is actually
    /// reachable before committing to it (spec §4.8: fall back if absent).
    pub fn probe(&self) -> anyhow::Result<()> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn load(&self) -> anyhow::Result<Option<DeviceIdentity>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, identity: &DeviceIdentity) -> anyhow::Result<()> {
        let entry = self.entry()?;
        let json = serde_json::to_string(identity)?;
        entry.set_password(&json)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
