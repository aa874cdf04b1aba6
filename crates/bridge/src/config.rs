// SPDX-License-Identifier: Apache-2.0

//! Static configuration schema, per spec §6.
//!
//! Loaded from a JSON file at startup and reloadable at runtime via
//! `POST /api/v1/config/reload` or the cloud's `reload_config` command.
//! Partial updates (`PUT /api/v1/config`) carry `Option<T>` per field so a
//! missing key means "leave unchanged", not "reset to default" (spec §9).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_key: Option<String>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub queue_max_size: Option<usize>,
    #[serde(default)]
    pub heartbeat_interval: Option<u64>,
    #[serde(default = "default_unlock_duration_ms")]
    pub unlock_duration: u64,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub enabled_adapters: Vec<String>,
    #[serde(default)]
    pub adapter_configs: HashMap<String, AdapterConfig>,
    #[serde(default = "default_true")]
    pub updates_enabled: bool,
    #[serde(default)]
    pub api_server: ApiServerConfig,
}

fn default_unlock_duration_ms() -> u64 {
    3000
}

fn default_database_path() -> String {
    "./data".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: None,
            device_key: None,
            server_url: None,
            tier: None,
            queue_max_size: None,
            heartbeat_interval: None,
            unlock_duration: default_unlock_duration_ms(),
            database_path: default_database_path(),
            log_level: default_log_level(),
            log_file: None,
            enabled_adapters: Vec::new(),
            adapter_configs: HashMap::new(),
            updates_enabled: true,
            api_server: ApiServerConfig::default(),
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing file is not an error — callers decide
    /// whether an absent config is fatal (e.g. pre-pairing it is not).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Persist atomically (write-tmp + rename), matching the secret store's
    /// and queue journal's durability discipline.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Resolve the operative tier: an explicit config override wins over the
    /// detector's sample (spec §6 `tier` key).
    pub fn tier_override(&self) -> Option<Tier> {
        match self.tier.as_deref() {
            Some("lite") => Some(Tier::Lite),
            Some("normal") => Some(Tier::Normal),
            Some("full") => Some(Tier::Full),
            _ => None,
        }
    }

    pub fn queue_dir(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }
}

/// Per-adapter configuration. Opaque payload beyond the two fields the
/// registry validates (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub device_type: String,
    #[serde(default)]
    pub connection: serde_json::Value,
    #[serde(default)]
    pub device_config: serde_json::Value,
    #[serde(default)]
    pub sync_interval: Option<u64>,
    #[serde(default)]
    pub requires_restart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub tls_cert_file: Option<String>,
    #[serde(default)]
    pub tls_key_file: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout: u64,
    #[serde(default = "default_timeout_secs")]
    pub write_timeout: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout: u64,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_port() -> u16 {
    8443
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    120
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            host: default_host(),
            tls_enabled: false,
            tls_cert_file: None,
            tls_key_file: None,
            read_timeout: default_timeout_secs(),
            write_timeout: default_timeout_secs(),
            idle_timeout: default_idle_timeout_secs(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub hmac_secret: Option<String>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub token_expiry: Option<u64>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
    #[serde(default = "default_window_secs")]
    pub window_size: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_interval: u64,
}

fn default_rpm() -> u32 {
    60
}
fn default_burst() -> u32 {
    10
}
fn default_window_secs() -> u64 {
    60
}
fn default_cleanup_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_rpm(),
            burst_size: default_burst(),
            window_size: default_window_secs(),
            cleanup_interval: default_cleanup_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub exposed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub max_age: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub hsts_enabled: bool,
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age: u64,
    #[serde(default)]
    pub hsts_include_subdomains: bool,
    #[serde(default)]
    pub csp_enabled: bool,
    #[serde(default)]
    pub csp_directive: Option<String>,
    #[serde(default)]
    pub frame_options: FrameOptions,
    #[serde(default = "default_true")]
    pub content_type_options: bool,
    #[serde(default = "default_true")]
    pub xss_protection: bool,
    #[serde(default)]
    pub referrer_policy: Option<String>,
}

fn default_hsts_max_age() -> u64 {
    31_536_000
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            hsts_enabled: false,
            hsts_max_age: default_hsts_max_age(),
            hsts_include_subdomains: false,
            csp_enabled: false,
            csp_directive: None,
            frame_options: FrameOptions::default(),
            content_type_options: true,
            xss_protection: true,
            referrer_policy: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum FrameOptions {
    Deny,
    #[default]
    SameOrigin,
    #[serde(rename = "ALLOW-FROM")]
    AllowFrom,
}

/// Partial-update document for `PUT /api/v1/config`. Every field is optional
/// so absence means "leave as-is" rather than "reset".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub server_url: Option<String>,
    pub tier: Option<String>,
    pub queue_max_size: Option<usize>,
    pub heartbeat_interval: Option<u64>,
    pub unlock_duration: Option<u64>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub enabled_adapters: Option<Vec<String>>,
    pub updates_enabled: Option<bool>,
}

impl ConfigPatch {
    /// Apply this patch onto `base`, leaving unset fields untouched.
    pub fn apply(self, base: &mut Config) {
        if let Some(v) = self.server_url {
            base.server_url = Some(v);
        }
        if let Some(v) = self.tier {
            base.tier = Some(v);
        }
        if let Some(v) = self.queue_max_size {
            base.queue_max_size = Some(v);
        }
        if let Some(v) = self.heartbeat_interval {
            base.heartbeat_interval = Some(v);
        }
        if let Some(v) = self.unlock_duration {
            base.unlock_duration = v;
        }
        if let Some(v) = self.log_level {
            base.log_level = v;
        }
        if let Some(v) = self.log_file {
            base.log_file = Some(v);
        }
        if let Some(v) = self.enabled_adapters {
            base.enabled_adapters = v;
        }
        if let Some(v) = self.updates_enabled {
            base.updates_enabled = v;
        }
    }

    /// Config values are redacted on read-back (spec §8 round-trip law).
    pub fn redact(mut config: Config) -> Config {
        config.device_key = config.device_key.map(|_| "***".to_owned());
        if let Some(secret) = config.api_server.auth.hmac_secret.as_mut() {
            *secret = "***".to_owned();
        }
        if let Some(secret) = config.api_server.auth.jwt_secret.as_mut() {
            *secret = "***".to_owned();
        }
        config.api_server.auth.api_keys =
            config.api_server.auth.api_keys.iter().map(|_| "***".to_owned()).collect();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_leaves_unset_fields_untouched() {
        let mut config = Config { unlock_duration: 4000, ..Config::default() };
        let patch = ConfigPatch { log_level: Some("debug".to_owned()), ..ConfigPatch::default() };
        patch.apply(&mut config);
        assert_eq!(config.unlock_duration, 4000);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn redact_hides_secrets_but_keeps_shape() {
        let mut config = Config::default();
        config.device_key = Some("supersecret".to_owned());
        config.api_server.auth.api_keys = vec!["key-a".to_owned()];
        let redacted = ConfigPatch::redact(config);
        assert_eq!(redacted.device_key.as_deref(), Some("***"));
        assert_eq!(redacted.api_server.auth.api_keys, vec!["***".to_owned()]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let config = Config { unlock_duration: 7000, ..Config::default() };
        config.save(&path).expect("save");
        let loaded = Config::load(&path).expect("load");
        assert_eq!(loaded.unlock_duration, 7000);
    }
}
