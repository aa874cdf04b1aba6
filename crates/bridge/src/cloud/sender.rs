// SPDX-License-Identifier: Apache-2.0

//! Batch sender loop (component E, spec §4.5): reserves a tier-sized batch
//! off the durable queue at a tier-dependent cadence, signs it, and POSTs it
//! to the cloud. Classifies the response into confirm / retry / dead-letter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::circuit::CircuitBreaker;
use crate::model::{DeviceIdentity, Tier};
use crate::queue::DurableQueue;
use crate::signing;

/// Reservation expiry: 3x the tier's batch wait, floored at 30s, per spec §4.2's guidance.
fn reservation_age(tier: Tier) -> Duration {
    (tier.max_batch_wait() * 3).max(Duration::from_secs(30))
}

pub struct Sender {
    queue: Arc<DurableQueue>,
    identity: Arc<RwLock<Option<DeviceIdentity>>>,
    tier: tokio::sync::watch::Receiver<Tier>,
    circuit: Arc<CircuitBreaker>,
    client: reqwest::Client,
}

impl Sender {
    pub fn new(
        queue: Arc<DurableQueue>,
        identity: Arc<RwLock<Option<DeviceIdentity>>>,
        tier: tokio::sync::watch::Receiver<Tier>,
        circuit: Arc<CircuitBreaker>,
    ) -> Self {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().unwrap_or_default();
        Self { queue, identity, tier, circuit, client }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let tier = *self.tier.borrow_and_update();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(tier.max_batch_wait()) => {}
            }
            self.queue.sweep_expired_reservations();
            self.try_send_once(tier).await;
        }
    }

    async fn try_send_once(&self, tier: Tier) {
        let identity = self.identity.read().await.clone();
        let Some(identity) = identity else { return };

        if !self.circuit.allow(tier.circuit_cooldown()) {
            return;
        }

        let stats = self.queue.stats();
        if stats.pending == 0 {
            return;
        }

        let (reservation, batch) = self.queue.reserve_batch(tier.max_batch_size(), reservation_age(tier));
        if batch.is_empty() {
            return;
        }

        let events: Vec<_> = batch.iter().map(|e| &e.event).collect();
        let body = match serde_json::to_vec(&events) {
            Ok(b) => b,
            Err(err) => {
                tracing::error!(%err, "failed to serialize batch, abandoning reservation");
                let ids: Vec<String> = batch.iter().map(|e| e.event.event_id.clone()).collect();
                self.queue.abandon(&reservation, &ids, "serialize_failed");
                return;
            }
        };

        let ids: Vec<String> = batch.iter().map(|e| e.event.event_id.clone()).collect();
        let path = "/events";
        let signed = signing::build(&identity.hmac_key, "POST", path, &body);
        let url = format!("{}{path}", identity.server_url);

        let outcome = self
            .client
            .post(&url)
            .header("X-Device-Id", &identity.device_id)
            .header("X-Timestamp", &signed.timestamp)
            .header("X-Nonce", &signed.nonce)
            .header("X-Signature", &signed.signature)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await;

        match outcome {
            Ok(resp) if resp.status().is_success() => {
                self.queue.confirm(&reservation, &ids);
                self.circuit.on_success();
                tracing::debug!(batch_size = ids.len(), "batch delivered");
            }
            Ok(resp) => {
                let status = resp.status();
                let retryable = status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error();
                let message = format!("http {status}");
                if retryable {
                    self.queue.abandon(&reservation, &ids, &message);
                    if status.is_server_error() {
                        self.circuit.on_failure();
                    }
                    tracing::warn!(%status, "batch send retryable failure");
                } else {
                    // Permanent rejection (e.g. 400/401/422): exhaust retries now.
                    self.queue.abandon_with_budget(&reservation, &ids, &message, 0);
                    tracing::error!(%status, "batch send rejected permanently, dead-lettering");
                }
            }
            Err(err) => {
                self.queue.abandon(&reservation, &ids, &err.to_string());
                self.circuit.on_failure();
                tracing::warn!(%err, "batch send network failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_age_floors_at_30s() {
        assert_eq!(reservation_age(Tier::Lite), Duration::from_secs(30));
    }

    #[test]
    fn reservation_age_floors_even_for_full_tier() {
        // 5s max_batch_wait * 3 = 15s, still below the 30s floor.
        assert_eq!(reservation_age(Tier::Full), Duration::from_secs(30));
    }
}
