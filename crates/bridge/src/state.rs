// SPDX-License-Identifier: Apache-2.0

//! Shared application state (spec §9: no global singletons — every
//! component handle is built once at startup and threaded through
//! explicitly, mirroring the teacher's `MuxState`).

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterRegistry;
use crate::cloud::CloudTransport;
use crate::config::Config;
use crate::door::DoorController;
use crate::http::ratelimit::RateLimiter;
use crate::ingestion::Pipeline;
use crate::notify::Notifier;
use crate::queue::DurableQueue;
use crate::secret::SecretStore;
use crate::util::epoch_millis;

pub struct BridgeState {
    pub config: RwLock<Config>,
    pub config_path: PathBuf,
    pub queue: Arc<DurableQueue>,
    pub registry: Arc<AdapterRegistry>,
    pub door: Arc<DoorController>,
    pub pipeline: Arc<Pipeline>,
    pub cloud: Arc<CloudTransport>,
    pub notifier: Notifier,
    pub tier: tokio::sync::watch::Receiver<crate::model::Tier>,
    pub secrets: Arc<dyn SecretStore>,
    pub rate_limiter: RateLimiter,
    pub shutdown: CancellationToken,
    pub started_at: u64,
}

impl BridgeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        config_path: PathBuf,
        queue: Arc<DurableQueue>,
        registry: Arc<AdapterRegistry>,
        door: Arc<DoorController>,
        pipeline: Arc<Pipeline>,
        cloud: Arc<CloudTransport>,
        notifier: Notifier,
        tier: tokio::sync::watch::Receiver<crate::model::Tier>,
        secrets: Arc<dyn SecretStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let rate_limiter =
            RateLimiter::new(config.api_server.rate_limit.requests_per_minute, config.api_server.rate_limit.burst_size);
        Self {
            config: RwLock::new(config),
            config_path,
            queue,
            registry,
            door,
            pipeline,
            cloud,
            notifier,
            tier,
            secrets,
            rate_limiter,
            shutdown,
            started_at: epoch_millis(),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        epoch_millis().saturating_sub(self.started_at)
    }
}
