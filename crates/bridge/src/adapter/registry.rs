// SPDX-License-Identifier: Apache-2.0

//! The adapter supervisor: starts enabled adapters concurrently, watches
//! their health, and restarts failed ones with jittered exponential backoff
//! (spec §4.3).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{Adapter, AdapterContext};
use crate::config::AdapterConfig;
use crate::error::BridgeError;
use crate::model::{AdapterLifecycle, AdapterStatus, Event};
use crate::util::{backoff_with_jitter, epoch_millis};

const RESTART_BASE: Duration = Duration::from_secs(2);
const RESTART_CAP: Duration = Duration::from_secs(5 * 60);
const STABLE_RESET_AFTER: Duration = Duration::from_secs(10 * 60);
const RESTART_JITTER_PCT: f64 = 0.2;

struct Slot {
    adapter: Adapter,
    config: AdapterConfig,
    enabled: bool,
    restart_attempt: u32,
    running_since: Option<u64>,
    next_restart_at: Option<u64>,
}

/// Owns every adapter instance exclusively (spec §3 ownership rule).
pub struct AdapterRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    device_id: String,
    emit: mpsc::Sender<Event>,
}

impl AdapterRegistry {
    /// `emit_capacity` bounds the adapter→ingestion channel (spec §9: tasks
    /// plus bounded channels, not callback inversion of control).
    pub fn new(device_id: &str, emit_capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(emit_capacity);
        (Self { slots: Mutex::new(HashMap::new()), device_id: device_id.to_owned(), emit: tx }, rx)
    }

    fn context(&self, name: &str) -> AdapterContext {
        AdapterContext { emit: self.emit.clone(), adapter_name: name.to_owned(), device_id: self.device_id.clone() }
    }

    /// Start every enabled adapter concurrently. A startup failure
    /// transitions that adapter to `error` without aborting the others
    /// (spec §4.3).
    pub async fn start_all(&self, configs: &HashMap<String, AdapterConfig>, enabled: &[String]) {
        let mut joins = JoinSet::new();
        for name in enabled {
            let Some(config) = configs.get(name) else {
                tracing::warn!(adapter = %name, "enabled adapter has no configuration, skipping");
                continue;
            };
            let adapter = match Adapter::from_config(name, config) {
                Ok(a) => a,
                Err(err) => {
                    tracing::error!(adapter = %name, error = %err, "failed to construct adapter");
                    continue;
                }
            };
            let ctx = self.context(name);
            let name = name.clone();
            let config = config.clone();
            joins.spawn(async move {
                let mut adapter = adapter;
                let result = adapter.start(ctx).await;
                (name, config, adapter, result)
            });
        }

        while let Some(joined) = joins.join_next().await {
            let Ok((name, config, adapter, result)) = joined else { continue };
            let mut slots = self.slots.lock().await;
            let slot = Slot {
                adapter,
                config,
                enabled: true,
                restart_attempt: 0,
                running_since: if result.is_ok() { Some(epoch_millis()) } else { None },
                next_restart_at: None,
            };
            if let Err(err) = &result {
                tracing::error!(adapter = %name, error = %err, "adapter failed to start");
            }
            slots.insert(name, slot);
        }
    }

    pub async fn enable(&self, name: &str) -> Result<bool, BridgeError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(name).ok_or(BridgeError::AdapterNotFound)?;
        if slot.enabled {
            return Ok(slot.config.requires_restart);
        }
        slot.enabled = true;
        let ctx = self.context(name);
        if let Err(err) = slot.adapter.start(ctx).await {
            tracing::error!(adapter = %name, error = %err, "adapter failed to start on enable");
        } else {
            slot.running_since = Some(epoch_millis());
        }
        Ok(slot.config.requires_restart)
    }

    pub async fn disable(&self, name: &str) -> Result<(), BridgeError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(name).ok_or(BridgeError::AdapterNotFound)?;
        slot.enabled = false;
        slot.adapter.stop().await;
        Ok(())
    }

    pub async fn status_all(&self) -> Vec<AdapterStatus> {
        let slots = self.slots.lock().await;
        slots.values().map(|s| s.adapter.health()).collect()
    }

    pub async fn status_of(&self, name: &str) -> Result<AdapterStatus, BridgeError> {
        let slots = self.slots.lock().await;
        slots.get(name).map(|s| s.adapter.health()).ok_or(BridgeError::AdapterNotFound)
    }

    pub async fn door_capable_names(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| s.enabled && s.adapter.is_door_capable())
            .map(|s| s.adapter.name().to_owned())
            .collect()
    }

    pub async fn unlock(&self, name: &str, duration_ms: u64) -> Result<(), BridgeError> {
        let slots = self.slots.lock().await;
        let slot = slots.get(name).ok_or(BridgeError::AdapterNotFound)?;
        if !slot.enabled {
            return Err(BridgeError::AdapterDisabled);
        }
        slot.adapter.unlock(duration_ms).await
    }

    pub async fn lock(&self, name: &str) -> Result<(), BridgeError> {
        let slots = self.slots.lock().await;
        let slot = slots.get(name).ok_or(BridgeError::AdapterNotFound)?;
        if !slot.enabled {
            return Err(BridgeError::AdapterDisabled);
        }
        slot.adapter.lock().await
    }

    pub async fn inject_event(&self, name: &str, event: Event) -> Result<(), BridgeError> {
        let slots = self.slots.lock().await;
        let slot = slots.get(name).ok_or(BridgeError::AdapterNotFound)?;
        slot.adapter.inject_event(event).await
    }

    pub async fn stop_all(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.values_mut() {
            slot.adapter.stop().await;
        }
    }

    /// Poll every adapter's health at `interval` and apply jittered
    /// exponential-backoff restarts to any in `error` (spec §4.3: base 2 s,
    /// cap 5 min, attempt counter reset after 10 min of stable `running`).
    pub async fn run_watchdog(&self, interval: Duration, cancel: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            self.sweep_once().await;
        }
    }

    async fn sweep_once(&self) {
        let now = epoch_millis();
        let mut slots = self.slots.lock().await;
        for (name, slot) in slots.iter_mut() {
            if !slot.enabled {
                continue;
            }
            let status = slot.adapter.health();

            if status.state == AdapterLifecycle::Running {
                if let Some(since) = slot.running_since {
                    if now.saturating_sub(since) >= STABLE_RESET_AFTER.as_millis() as u64 {
                        slot.restart_attempt = 0;
                    }
                } else {
                    slot.running_since = Some(now);
                }
                continue;
            }

            if status.state != AdapterLifecycle::Error {
                continue;
            }

            slot.running_since = None;
            let due = slot.next_restart_at.map_or(true, |t| now >= t);
            if !due {
                continue;
            }

            tracing::warn!(adapter = %name, attempt = slot.restart_attempt, "restarting adapter after error");
            slot.adapter.stop().await;
            let ctx = AdapterContext {
                emit: self.emit.clone(),
                adapter_name: name.clone(),
                device_id: self.device_id.clone(),
            };
            if let Err(err) = slot.adapter.start(ctx).await {
                tracing::error!(adapter = %name, error = %err, "adapter restart failed");
            } else {
                slot.running_since = Some(epoch_millis());
            }
            let backoff = backoff_with_jitter(RESTART_BASE, RESTART_CAP, slot.restart_attempt, RESTART_JITTER_PCT);
            slot.restart_attempt = slot.restart_attempt.saturating_add(1);
            slot.next_restart_at = Some(epoch_millis() + backoff.as_millis() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator_config() -> AdapterConfig {
        AdapterConfig {
            device_type: "simulator".into(),
            connection: serde_json::json!({}),
            device_config: serde_json::json!({}),
            sync_interval: Some(3600),
            requires_restart: false,
        }
    }

    #[tokio::test]
    async fn start_all_brings_adapter_to_running() {
        let (registry, _rx) = AdapterRegistry::new("dev1", 16);
        let mut configs = HashMap::new();
        configs.insert("sim1".to_owned(), simulator_config());
        registry.start_all(&configs, &["sim1".to_owned()]).await;

        let statuses = registry.status_all().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, AdapterLifecycle::Running);
    }

    #[tokio::test]
    async fn unknown_adapter_name_rejected() {
        let (registry, _rx) = AdapterRegistry::new("dev1", 16);
        let err = registry.unlock("ghost", 3000).await.expect_err("not found");
        assert_eq!(err, BridgeError::AdapterNotFound);
    }

    #[tokio::test]
    async fn disable_then_enable_round_trip() {
        let (registry, _rx) = AdapterRegistry::new("dev1", 16);
        let mut configs = HashMap::new();
        configs.insert("sim1".to_owned(), simulator_config());
        registry.start_all(&configs, &["sim1".to_owned()]).await;

        registry.disable("sim1").await.expect("disable");
        let requires_restart = registry.enable("sim1").await.expect("enable");
        assert!(!requires_restart);
        let statuses = registry.status_all().await;
        assert_eq!(statuses[0].state, AdapterLifecycle::Running);
    }

    #[tokio::test]
    async fn inject_event_reaches_emit_channel() {
        let (registry, mut rx) = AdapterRegistry::new("dev1", 16);
        let mut configs = HashMap::new();
        configs.insert("sim1".to_owned(), simulator_config());
        registry.start_all(&configs, &["sim1".to_owned()]).await;

        let event = crate::model::Event {
            event_id: "e1".into(),
            external_user_id: "u1".into(),
            internal_user_id: None,
            device_id: "dev1".into(),
            adapter_name: "sim1".into(),
            event_type: crate::model::EventType::Entry,
            timestamp: epoch_millis(),
            is_simulated: true,
            raw_data: Default::default(),
        };
        registry.inject_event("sim1", event).await.expect("inject");
        let received = rx.recv().await.expect("event received");
        assert_eq!(received.event_id, "e1");
    }
}
