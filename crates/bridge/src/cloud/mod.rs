// SPDX-License-Identifier: Apache-2.0

//! Cloud Transport (component E, spec §4.5): everything that talks to the
//! remote control plane — the signed batch sender, heartbeat, remote command
//! poller, circuit breaker, and pairing exchange.

pub mod circuit;
pub mod commands;
pub mod heartbeat;
pub mod pairing;
pub mod sender;

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

pub use commands::ManagementCommand;

use circuit::CircuitBreaker;
use commands::CommandPoller;
use heartbeat::Heartbeat;
use sender::Sender;

use crate::adapter::AdapterRegistry;
use crate::door::DoorController;
use crate::model::{DeviceIdentity, Tier};
use crate::queue::DurableQueue;

/// Shared, swappable device identity. `None` before pairing or after unpair;
/// every cloud-facing task reads a fresh clone on each cycle rather than
/// caching it, so pairing/unpairing takes effect within one cycle (spec §8
/// identity atomicity invariant).
pub type SharedIdentity = Arc<RwLock<Option<DeviceIdentity>>>;

/// Owns the three long-running cloud tasks and the breaker they share.
pub struct CloudTransport {
    pub identity: SharedIdentity,
    pub circuit: Arc<CircuitBreaker>,
    queue: Arc<DurableQueue>,
    registry: Arc<AdapterRegistry>,
    door: Arc<DoorController>,
    tier: tokio::sync::watch::Receiver<Tier>,
}

impl CloudTransport {
    pub fn new(
        identity: Option<DeviceIdentity>,
        queue: Arc<DurableQueue>,
        registry: Arc<AdapterRegistry>,
        door: Arc<DoorController>,
        tier: tokio::sync::watch::Receiver<Tier>,
    ) -> Self {
        Self {
            identity: Arc::new(RwLock::new(identity)),
            circuit: Arc::new(CircuitBreaker::default()),
            queue,
            registry,
            door,
            tier,
        }
    }

    /// Spawn the sender, heartbeat, and command poller tasks. Returns the
    /// management-command receiver for `reload_config`/`unpair` — the
    /// caller (state/lib) owns config reload and credential storage, cloud
    /// transport itself holds no opinion on either.
    pub fn spawn(&self, cancel: CancellationToken) -> mpsc::Receiver<ManagementCommand> {
        let (management_tx, management_rx) = mpsc::channel(16);

        let sender = Sender::new(self.queue.clone(), self.identity.clone(), self.tier.clone(), self.circuit.clone());
        tokio::spawn(sender.run(cancel.clone()));

        let heartbeat = Heartbeat::new(
            self.queue.clone(),
            self.registry.clone(),
            self.identity.clone(),
            self.tier.clone(),
            self.circuit.clone(),
        );
        tokio::spawn(heartbeat.run(cancel.clone()));

        let commands = CommandPoller::new(self.door.clone(), self.identity.clone(), self.tier.clone(), management_tx);
        tokio::spawn(commands.run(cancel));

        management_rx
    }

    pub async fn set_identity(&self, identity: DeviceIdentity) {
        *self.identity.write().await = Some(identity);
    }

    /// Wipe the identity atomically (spec §4.8 unpair). Callers are
    /// responsible for also removing it from the secret store.
    pub async fn clear_identity(&self) {
        *self.identity.write().await = None;
    }

    pub async fn is_paired(&self) -> bool {
        self.identity.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::DoorController;
    use crate::notify;

    fn transport(identity: Option<DeviceIdentity>) -> CloudTransport {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Arc::new(DurableQueue::open(dir.path(), 100).expect("open queue"));
        let (registry, _emit_rx) = AdapterRegistry::new("dev-test", 16);
        let registry = Arc::new(registry);
        let (notifier, _rx) = notify::channel();
        let door = Arc::new(DoorController::new(registry.clone(), notifier));
        let (_tx, tier_rx) = tokio::sync::watch::channel(Tier::Normal);
        CloudTransport::new(identity, queue, registry, door, tier_rx)
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "dev-1".into(),
            hmac_key: "key".into(),
            server_url: "https://cloud.example".into(),
            paired_at: 0,
        }
    }

    #[tokio::test]
    async fn unpaired_by_default_when_no_identity_given() {
        let transport = transport(None);
        assert!(!transport.is_paired().await);
    }

    #[tokio::test]
    async fn set_identity_marks_paired() {
        let transport = transport(None);
        transport.set_identity(identity()).await;
        assert!(transport.is_paired().await);
    }

    #[tokio::test]
    async fn clear_identity_marks_unpaired() {
        let transport = transport(Some(identity()));
        assert!(transport.is_paired().await);
        transport.clear_identity().await;
        assert!(!transport.is_paired().await);
    }
}
