// SPDX-License-Identifier: Apache-2.0

//! Remote command poller (component E, spec §4.5): short-polls `GET
//! /commands` at tier cadence, dispatches `unlock_door`/`lock_door`/
//! `reload_config`/`unpair`, and acks each `command_id` exactly once —
//! redelivery is tolerated via a short-lived dedup window (spec §8 scenario 4).

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::door::DoorController;
use crate::model::{DeviceIdentity, Tier};
use crate::queue::dedup::DedupWindow;
use crate::signing;
use crate::util::epoch_millis;

/// Commands stay remembered long enough to cover a few poll cycles of
/// redelivery, well short of the dedup window the queue uses for events.
const SEEN_CAPACITY: usize = 500;
const SEEN_TTL: Duration = Duration::from_secs(60 * 60);

const DEFAULT_UNLOCK_REASON: &str = "remote_command";

#[derive(Debug, Clone)]
pub enum ManagementCommand {
    ReloadConfig,
    Unpair,
}

#[derive(Debug, Deserialize)]
struct CommandsResponse {
    #[serde(default)]
    commands: Vec<RemoteCommand>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteCommand {
    command_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    adapter: Option<String>,
}

pub struct CommandPoller {
    door: Arc<DoorController>,
    identity: Arc<RwLock<Option<DeviceIdentity>>>,
    tier: tokio::sync::watch::Receiver<Tier>,
    management: mpsc::Sender<ManagementCommand>,
    client: reqwest::Client,
    seen: Mutex<DedupWindow>,
}

impl CommandPoller {
    pub fn new(
        door: Arc<DoorController>,
        identity: Arc<RwLock<Option<DeviceIdentity>>>,
        tier: tokio::sync::watch::Receiver<Tier>,
        management: mpsc::Sender<ManagementCommand>,
    ) -> Self {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().unwrap_or_default();
        Self {
            door,
            identity,
            tier,
            management,
            client,
            seen: Mutex::new(DedupWindow::with_limits(SEEN_CAPACITY, SEEN_TTL)),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let interval = self.tier.borrow_and_update().max_batch_wait().max(Duration::from_secs(1));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.poll_once().await;
        }
    }

    async fn poll_once(&self) {
        let identity = self.identity.read().await.clone();
        let Some(identity) = identity else { return };

        let path = "/commands";
        let signed = signing::build(&identity.hmac_key, "GET", path, b"");
        let url = format!("{}{path}", identity.server_url);

        let response = self
            .client
            .get(&url)
            .header("X-Device-Id", &identity.device_id)
            .header("X-Timestamp", &signed.timestamp)
            .header("X-Nonce", &signed.nonce)
            .header("X-Signature", &signed.signature)
            .send()
            .await;

        let body = match response {
            Ok(resp) if resp.status().is_success() => resp.json::<CommandsResponse>().await,
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "command poll returned non-success");
                return;
            }
            Err(err) => {
                tracing::debug!(%err, "command poll failed");
                return;
            }
        };

        let Ok(body) = body else {
            tracing::warn!("command poll response was not valid JSON");
            return;
        };

        for command in body.commands {
            self.dispatch(&identity, command).await;
        }
    }

    async fn dispatch(&self, identity: &DeviceIdentity, command: RemoteCommand) {
        let already_seen = {
            #[allow(clippy::unwrap_used)]
            let mut seen = self.seen.lock().await;
            seen.check_and_insert(&command.command_id, epoch_millis())
        };

        if !already_seen {
            self.execute(&command).await;
        }

        self.ack(identity, &command.command_id).await;
    }

    async fn execute(&self, command: &RemoteCommand) {
        let reason = command.reason.as_deref().unwrap_or(DEFAULT_UNLOCK_REASON);
        let result = match command.kind.as_str() {
            "unlock_door" => {
                let duration_ms = command.duration_ms.unwrap_or(crate::door::MIN_UNLOCK_DURATION_MS);
                self.door.unlock(duration_ms, reason, "cloud", command.adapter.as_deref()).await
            }
            "lock_door" => self.door.lock(reason, "cloud", command.adapter.as_deref()).await,
            "reload_config" => {
                let _ = self.management.send(ManagementCommand::ReloadConfig).await;
                Ok(())
            }
            "unpair" => {
                let _ = self.management.send(ManagementCommand::Unpair).await;
                Ok(())
            }
            other => {
                tracing::warn!(kind = %other, "unknown remote command type");
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::warn!(command_id = %command.command_id, kind = %command.kind, ?err, "remote command failed");
        }
    }

    async fn ack(&self, identity: &DeviceIdentity, command_id: &str) {
        let path = format!("/commands/{command_id}/ack");
        let signed = signing::build(&identity.hmac_key, "POST", &path, b"");
        let url = format!("{}{path}", identity.server_url);

        let result = self
            .client
            .post(&url)
            .header("X-Device-Id", &identity.device_id)
            .header("X-Timestamp", &signed.timestamp)
            .header("X-Nonce", &signed.nonce)
            .header("X-Signature", &signed.signature)
            .send()
            .await;

        if let Err(err) = result {
            tracing::warn!(%command_id, %err, "failed to ack remote command");
        }
    }
}
