// SPDX-License-Identifier: Apache-2.0

//! Adapter Registry (component C): hardware adapters modeled as a tagged sum
//! over variants, per spec §4.3 and the redesign note in spec §9 against
//! duck-typed adapters. The registry is generic over the capability set
//! `{start, stop, health, unlock, lock, on_event}`, never over a concrete
//! adapter type.

pub mod essl;
pub mod realtime;
mod registry;
pub mod simulator;
pub mod zkteco;

use tokio::sync::mpsc;

use crate::config::AdapterConfig;
use crate::error::BridgeError;
use crate::model::{AdapterStatus, Event};

pub use registry::AdapterRegistry;

/// Handed to an adapter's driver loop at `start`. Adapters never hold a
/// pointer back into the ingestion pipeline or door controller (spec §9's
/// cyclic-reference note) — they only ever push through `emit`.
#[derive(Clone)]
pub struct AdapterContext {
    pub emit: mpsc::Sender<Event>,
    pub adapter_name: String,
    pub device_id: String,
}

/// One concrete hardware adapter. Each variant owns its own driver task and
/// reports health through the shared [`AdapterStatus`] shape.
pub enum Adapter {
    Simulator(simulator::SimulatorAdapter),
    ZkTeco(zkteco::ZkTecoAdapter),
    Essl(essl::EsslAdapter),
    Realtime(realtime::RealtimeAdapter),
}

impl Adapter {
    pub fn from_config(name: &str, config: &AdapterConfig) -> anyhow::Result<Self> {
        match config.device_type.as_str() {
            "simulator" => Ok(Adapter::Simulator(simulator::SimulatorAdapter::new(name, config))),
            "zkteco" => Ok(Adapter::ZkTeco(zkteco::ZkTecoAdapter::new(name, config))),
            "essl" => Ok(Adapter::Essl(essl::EsslAdapter::new(name, config))),
            "realtime" => Ok(Adapter::Realtime(realtime::RealtimeAdapter::new(name, config))),
            other => anyhow::bail!("unknown adapter device_type: {other}"),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Adapter::Simulator(a) => a.name(),
            Adapter::ZkTeco(a) => a.name(),
            Adapter::Essl(a) => a.name(),
            Adapter::Realtime(a) => a.name(),
        }
    }

    pub async fn start(&mut self, ctx: AdapterContext) -> anyhow::Result<()> {
        match self {
            Adapter::Simulator(a) => a.start(ctx).await,
            Adapter::ZkTeco(a) => a.start(ctx).await,
            Adapter::Essl(a) => a.start(ctx).await,
            Adapter::Realtime(a) => a.start(ctx).await,
        }
    }

    pub async fn stop(&mut self) {
        match self {
            Adapter::Simulator(a) => a.stop().await,
            Adapter::ZkTeco(a) => a.stop().await,
            Adapter::Essl(a) => a.stop().await,
            Adapter::Realtime(a) => a.stop().await,
        }
    }

    pub fn health(&self) -> AdapterStatus {
        match self {
            Adapter::Simulator(a) => a.health(),
            Adapter::ZkTeco(a) => a.health(),
            Adapter::Essl(a) => a.health(),
            Adapter::Realtime(a) => a.health(),
        }
    }

    pub fn is_door_capable(&self) -> bool {
        matches!(self, Adapter::Simulator(_) | Adapter::ZkTeco(_) | Adapter::Essl(_))
    }

    pub async fn unlock(&self, duration_ms: u64) -> Result<(), BridgeError> {
        if !self.is_door_capable() {
            return Err(BridgeError::ValidationFailed);
        }
        match self {
            Adapter::Simulator(a) => a.unlock(duration_ms).await,
            Adapter::ZkTeco(a) => a.unlock(duration_ms).await,
            Adapter::Essl(a) => a.unlock(duration_ms).await,
            Adapter::Realtime(_) => Err(BridgeError::ValidationFailed),
        }
    }

    pub async fn lock(&self) -> Result<(), BridgeError> {
        if !self.is_door_capable() {
            return Err(BridgeError::ValidationFailed);
        }
        match self {
            Adapter::Simulator(a) => a.lock().await,
            Adapter::ZkTeco(a) => a.lock().await,
            Adapter::Essl(a) => a.lock().await,
            Adapter::Realtime(_) => Err(BridgeError::ValidationFailed),
        }
    }

    /// Direct event injection; only the `simulator` variant honors it (spec
    /// §2: "event injection allowed for simulator only").
    pub async fn inject_event(&self, event: Event) -> Result<(), BridgeError> {
        match self {
            Adapter::Simulator(a) => a.inject_event(event).await,
            _ => Err(BridgeError::ValidationFailed),
        }
    }
}

/// Shared driver-loop scaffolding used by the non-simulator adapters: a
/// periodic reachability probe that drives lifecycle state, since the actual
/// vendor wire protocols are out of scope (spec §1's hardware-vendor-SDK
/// non-goal). Real integrations would replace `probe` with the vendor SDK
/// call while keeping this lifecycle shape.
pub(crate) mod driver {
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use std::sync::Mutex;

    use tokio_util::sync::CancellationToken;

    use crate::model::{AdapterLifecycle, AdapterStatus};
    use crate::util::epoch_millis;

    pub fn lifecycle_to_u8(s: AdapterLifecycle) -> u8 {
        match s {
            AdapterLifecycle::Stopped => 0,
            AdapterLifecycle::Starting => 1,
            AdapterLifecycle::Running => 2,
            AdapterLifecycle::Degraded => 3,
            AdapterLifecycle::Stopping => 4,
            AdapterLifecycle::Error => 5,
        }
    }

    pub fn u8_to_lifecycle(v: u8) -> AdapterLifecycle {
        match v {
            0 => AdapterLifecycle::Stopped,
            1 => AdapterLifecycle::Starting,
            2 => AdapterLifecycle::Running,
            3 => AdapterLifecycle::Degraded,
            4 => AdapterLifecycle::Stopping,
            _ => AdapterLifecycle::Error,
        }
    }

    pub struct SharedStatus {
        name: String,
        state: AtomicU8,
        last_event_at: Mutex<Option<u64>>,
        last_error: Mutex<Option<String>>,
    }

    impl SharedStatus {
        pub fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                state: AtomicU8::new(lifecycle_to_u8(AdapterLifecycle::Stopped)),
                last_event_at: Mutex::new(None),
                last_error: Mutex::new(None),
            })
        }

        pub fn set_state(&self, state: AdapterLifecycle) {
            self.state.store(lifecycle_to_u8(state), Ordering::Relaxed);
        }

        pub fn state(&self) -> AdapterLifecycle {
            u8_to_lifecycle(self.state.load(Ordering::Relaxed))
        }

        fn lock_last_event(&self) -> std::sync::MutexGuard<'_, Option<u64>> {
            #[allow(clippy::unwrap_used)]
            self.last_event_at.lock().unwrap_or_else(|p| p.into_inner())
        }

        fn lock_last_error(&self) -> std::sync::MutexGuard<'_, Option<String>> {
            #[allow(clippy::unwrap_used)]
            self.last_error.lock().unwrap_or_else(|p| p.into_inner())
        }

        pub fn record_event(&self) {
            *self.lock_last_event() = Some(epoch_millis());
        }

        pub fn record_error(&self, error: impl Into<String>) {
            *self.lock_last_error() = Some(error.into());
            self.set_state(AdapterLifecycle::Error);
        }

        pub fn snapshot(&self) -> AdapterStatus {
            AdapterStatus {
                name: self.name.clone(),
                state: self.state(),
                last_event_at: *self.lock_last_event(),
                last_error: self.lock_last_error().clone(),
                updated_at: epoch_millis(),
            }
        }
    }

    /// Periodically probe `host:port`; flips between `running` and
    /// `degraded`/`error` based on reachability. Stops on `cancel`.
    pub async fn tcp_reachability_loop(
        host: String,
        port: u16,
        interval: Duration,
        status: Arc<SharedStatus>,
        cancel: CancellationToken,
    ) {
        status.set_state(AdapterLifecycle::Running);
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let addr = format!("{host}:{port}");
            match tokio::time::timeout(Duration::from_secs(2), tokio::net::TcpStream::connect(&addr)).await
            {
                Ok(Ok(_)) => status.set_state(AdapterLifecycle::Running),
                Ok(Err(err)) => {
                    tracing::debug!(adapter = %status.name, %addr, error = %err, "adapter unreachable");
                    status.record_error(err.to_string());
                }
                Err(_) => {
                    status.record_error("connect timeout");
                }
            }
        }
        status.set_state(AdapterLifecycle::Stopped);
    }
}
