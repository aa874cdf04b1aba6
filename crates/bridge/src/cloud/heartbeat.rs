// SPDX-License-Identifier: Apache-2.0

//! Heartbeat loop (component E, spec §4.5): periodically PUTs a status
//! summary to the cloud at tier cadence so the control plane can tell a
//! quiet bridge from a dead one.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::circuit::{CircuitBreaker, CircuitState};
use crate::adapter::AdapterRegistry;
use crate::model::{AdapterStatus, DeviceIdentity, Tier};
use crate::queue::DurableQueue;
use crate::signing;
use crate::util::epoch_millis;

#[derive(Debug, Serialize)]
struct HeartbeatBody {
    status: &'static str,
    queue_depth: usize,
    adapter_summary: Vec<AdapterStatus>,
    tier: &'static str,
    version: &'static str,
    uptime_ms: u64,
}

pub struct Heartbeat {
    queue: Arc<DurableQueue>,
    registry: Arc<AdapterRegistry>,
    identity: Arc<RwLock<Option<DeviceIdentity>>>,
    tier: tokio::sync::watch::Receiver<Tier>,
    circuit: Arc<CircuitBreaker>,
    client: reqwest::Client,
    started_at: u64,
}

impl Heartbeat {
    pub fn new(
        queue: Arc<DurableQueue>,
        registry: Arc<AdapterRegistry>,
        identity: Arc<RwLock<Option<DeviceIdentity>>>,
        tier: tokio::sync::watch::Receiver<Tier>,
        circuit: Arc<CircuitBreaker>,
    ) -> Self {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().unwrap_or_default();
        Self { queue, registry, identity, tier, circuit, client, started_at: epoch_millis() }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let interval = self.tier.borrow_and_update().heartbeat_interval();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.send_once().await;
        }
    }

    async fn send_once(&self) {
        let identity = self.identity.read().await.clone();
        let Some(identity) = identity else { return };

        let tier = *self.tier.borrow();
        let adapter_summary = self.registry.status_all().await;
        let status = if self.circuit.state() == CircuitState::Open {
            "cloud_unreachable"
        } else if adapter_summary.iter().any(|a| a.state == crate::model::AdapterLifecycle::Error) {
            "degraded"
        } else {
            "healthy"
        };

        let body = HeartbeatBody {
            status,
            queue_depth: self.queue.stats().depth,
            adapter_summary,
            tier: tier.as_str(),
            version: env!("CARGO_PKG_VERSION"),
            uptime_ms: epoch_millis().saturating_sub(self.started_at),
        };

        let payload = match serde_json::to_vec(&body) {
            Ok(p) => p,
            Err(err) => {
                tracing::error!(%err, "failed to serialize heartbeat");
                return;
            }
        };

        let path = "/heartbeat";
        let signed = signing::build(&identity.hmac_key, "PUT", path, &payload);
        let url = format!("{}{path}", identity.server_url);

        let result = self
            .client
            .put(&url)
            .header("X-Device-Id", &identity.device_id)
            .header("X-Timestamp", &signed.timestamp)
            .header("X-Nonce", &signed.nonce)
            .header("X-Signature", &signed.signature)
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await;

        // A missed heartbeat doesn't stop the sender loop or trip the
        // circuit breaker on its own (spec §4.5); only batch send failures do.
        if let Err(err) = result {
            tracing::warn!(%err, "heartbeat send failed");
        }
    }
}
