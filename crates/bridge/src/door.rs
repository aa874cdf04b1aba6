// SPDX-License-Identifier: Apache-2.0

//! Door Controller (component F): serializes unlock/lock requests across
//! whatever door-capable adapters are enabled, and runs the deadline sweep
//! that re-locks an expired unlock (spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterRegistry;
use crate::error::BridgeError;
use crate::model::DoorState;
use crate::notify::{ControlEvent, Notifier};
use crate::util::epoch_millis;

pub const MIN_UNLOCK_DURATION_MS: u64 = 1_000;
pub const MAX_UNLOCK_DURATION_MS: u64 = 30_000;

/// Sweep cadence for expiring unlocks; well under the minimum unlock
/// duration so a deadline is never missed by more than a fraction of it.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

pub struct DoorController {
    registry: Arc<AdapterRegistry>,
    notifier: Notifier,
    state: Mutex<DoorState>,
}

impl DoorController {
    pub fn new(registry: Arc<AdapterRegistry>, notifier: Notifier) -> Self {
        Self { registry, notifier, state: Mutex::new(DoorState::default()) }
    }

    pub async fn status(&self) -> DoorState {
        self.state.lock().await.clone()
    }

    /// Unlock for `duration_ms`, fanning out to every enabled door-capable
    /// adapter unless `adapter` names a specific one. A second unlock before
    /// the first's deadline extends to the later of the two deadlines and
    /// does not re-issue the hardware call if already unlocked (spec §4.6).
    pub async fn unlock(
        &self,
        duration_ms: u64,
        reason: &str,
        requested_by: &str,
        adapter: Option<&str>,
    ) -> Result<(), BridgeError> {
        if !(MIN_UNLOCK_DURATION_MS..=MAX_UNLOCK_DURATION_MS).contains(&duration_ms) {
            return Err(BridgeError::InvalidRange);
        }

        let mut state = self.state.lock().await;
        let now = epoch_millis();
        let new_deadline = now + duration_ms;
        let already_unlocked = !state.is_locked && state.unlock_until.map(|d| d > now).unwrap_or(false);

        if !already_unlocked {
            self.fanout_unlock(duration_ms, reason, requested_by, adapter).await?;
        }
        state.unlock_count += 1;

        state.is_locked = false;
        state.last_unlock_at = Some(now);
        state.unlock_until = Some(state.unlock_until.map(|d| d.max(new_deadline)).unwrap_or(new_deadline));

        let snapshot = state.clone();
        drop(state);
        let _ = self.notifier.send(ControlEvent::DoorUnlock(snapshot));
        Ok(())
    }

    pub async fn lock(&self, reason: &str, requested_by: &str, adapter: Option<&str>) -> Result<(), BridgeError> {
        self.fanout_lock(reason, requested_by, adapter).await?;

        let mut state = self.state.lock().await;
        state.is_locked = true;
        state.last_lock_at = Some(epoch_millis());
        state.unlock_until = None;
        let snapshot = state.clone();
        drop(state);
        let _ = self.notifier.send(ControlEvent::DoorLock(snapshot));
        Ok(())
    }

    async fn fanout_unlock(
        &self,
        duration_ms: u64,
        reason: &str,
        requested_by: &str,
        adapter: Option<&str>,
    ) -> Result<(), BridgeError> {
        tracing::info!(%reason, %requested_by, duration_ms, adapter = ?adapter, "unlocking door");
        let targets = self.target_adapters(adapter).await?;
        let mut failures = HashMap::new();
        for name in targets {
            if let Err(err) = self.registry.unlock(&name, duration_ms).await {
                failures.insert(name, err.as_str().to_owned());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::DoorOperationFailed { failures })
        }
    }

    async fn fanout_lock(&self, reason: &str, requested_by: &str, adapter: Option<&str>) -> Result<(), BridgeError> {
        tracing::info!(%reason, %requested_by, adapter = ?adapter, "locking door");
        let targets = self.target_adapters(adapter).await?;
        let mut failures = HashMap::new();
        for name in targets {
            if let Err(err) = self.registry.lock(&name).await {
                failures.insert(name, err.as_str().to_owned());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::DoorOperationFailed { failures })
        }
    }

    async fn target_adapters(&self, adapter: Option<&str>) -> Result<Vec<String>, BridgeError> {
        match adapter {
            Some(name) => {
                let names = self.registry.door_capable_names().await;
                if names.iter().any(|n| n == name) {
                    Ok(vec![name.to_owned()])
                } else {
                    Err(BridgeError::AdapterNotFound)
                }
            }
            None => Ok(self.registry.door_capable_names().await),
        }
    }

    /// Re-lock any door whose `unlock_until` deadline has passed. Runs as a
    /// background task alongside the adapter registry watchdog.
    pub async fn run_sweep(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.sweep_once().await,
            }
        }
    }

    async fn sweep_once(&self) {
        let expired = {
            let state = self.state.lock().await;
            !state.is_locked && state.unlock_until.map(|d| d <= epoch_millis()).unwrap_or(false)
        };
        if expired {
            if let Err(err) = self.lock("unlock_deadline_expired", "system", None).await {
                tracing::warn!(?err, "failed to auto-relock door past deadline");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use std::collections::HashMap as StdHashMap;

    async fn controller() -> (Arc<DoorController>, Arc<AdapterRegistry>, tokio::sync::broadcast::Receiver<ControlEvent>) {
        let (registry, _rx) = AdapterRegistry::new("dev-1", 64);
        let registry = Arc::new(registry);
        let config = AdapterConfig {
            device_type: "simulator".to_owned(),
            connection: serde_json::Value::Null,
            device_config: serde_json::Value::Null,
            sync_interval: None,
            requires_restart: false,
        };
        let mut configs = StdHashMap::new();
        configs.insert("sim".to_owned(), config);
        registry.start_all(&configs, &["sim".to_owned()]).await;
        let (notifier, notify_rx) = crate::notify::channel();
        (Arc::new(DoorController::new(registry.clone(), notifier)), registry, notify_rx)
    }

    #[tokio::test]
    async fn unlock_out_of_range_duration_rejected() {
        let (controller, _registry, _rx) = controller().await;
        let err = controller.unlock(500, "test", "tester", None).await.expect_err("too short");
        assert_eq!(err, BridgeError::InvalidRange);
    }

    #[tokio::test]
    async fn unlock_then_lock_round_trip() {
        let (controller, _registry, _rx) = controller().await;
        controller.unlock(2_000, "test", "tester", None).await.expect("unlock");
        let status = controller.status().await;
        assert!(!status.is_locked);
        assert_eq!(status.unlock_count, 1);

        controller.lock("test", "tester", None).await.expect("lock");
        let status = controller.status().await;
        assert!(status.is_locked);
        assert!(status.unlock_until.is_none());
    }

    #[tokio::test]
    async fn second_unlock_before_deadline_still_increments_count() {
        let (controller, _registry, _rx) = controller().await;
        controller.unlock(2_000, "a", "tester", None).await.expect("first");
        let first_deadline = controller.status().await.unlock_until.expect("deadline");

        controller.unlock(5_000, "b", "tester", None).await.expect("second");
        let status = controller.status().await;
        assert_eq!(status.unlock_count, 2, "every unlock call counts, even without a second hardware call");
        assert!(status.unlock_until.expect("deadline") >= first_deadline);
    }

    #[tokio::test]
    async fn unknown_adapter_target_rejected() {
        let (controller, _registry, _rx) = controller().await;
        let err = controller.unlock(2_000, "test", "tester", Some("missing")).await.expect_err("not found");
        assert_eq!(err, BridgeError::AdapterNotFound);
    }
}
