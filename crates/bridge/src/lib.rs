// SPDX-License-Identifier: Apache-2.0

//! The bridge daemon's core: every component wired together by [`run`].
//! No global singletons (spec §9) — each handle below is built once here
//! and threaded explicitly into whatever task needs it.

pub mod adapter;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod door;
pub mod error;
pub mod http;
pub mod ingestion;
pub mod model;
pub mod notify;
pub mod queue;
pub mod secret;
pub mod signing;
pub mod state;
pub mod tier;
pub mod util;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use adapter::AdapterRegistry;
use cloud::{CloudTransport, ManagementCommand};
use config::Config;
use door::DoorController;
use ingestion::enrich::EnrichmentCache;
use ingestion::Pipeline;
use model::{DeviceIdentity, Tier};
use queue::DurableQueue;
use state::BridgeState;
use tier::TierDetector;

/// Cadence for the adapter registry's health watchdog (spec §4.3).
const ADAPTER_WATCHDOG_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
/// Cadence for the tier detector's periodic re-sample (spec §4.1).
const TIER_SAMPLE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
/// Bound on the adapter→ingestion emit channel.
const EMIT_CHANNEL_CAPACITY: usize = 1_024;

pub async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load(&config_path)?;
    let data_dir = config.queue_dir();
    std::fs::create_dir_all(&data_dir)?;

    let secrets = secret::open(&data_dir);
    let identity = secrets.load()?;
    let device_id = identity
        .as_ref()
        .map(|i| i.device_id.clone())
        .or_else(|| config.device_id.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let tier_detector = TierDetector::initial_sample(config.tier_override())?;
    let tier_rx = tier_detector.subscribe();
    let initial_tier = tier_detector.current();

    let capacity = config.queue_max_size.unwrap_or_else(|| initial_tier.queue_capacity());
    let queue = Arc::new(DurableQueue::open(&data_dir, capacity)?);

    let (registry, emit_rx) = AdapterRegistry::new(&device_id, EMIT_CHANNEL_CAPACITY);
    let registry = Arc::new(registry);
    registry.start_all(&config.adapter_configs, &config.enabled_adapters).await;

    let (notifier, _notify_rx) = notify::channel();
    let door = Arc::new(DoorController::new(registry.clone(), notifier.clone()));
    let enrich = Arc::new(EnrichmentCache::new());
    let pipeline = Arc::new(Pipeline::new(queue.clone(), enrich, notifier.clone()));

    let cloud = Arc::new(CloudTransport::new(identity, queue.clone(), registry.clone(), door.clone(), tier_rx.clone()));

    let shutdown = CancellationToken::new();
    let secrets: Arc<dyn secret::SecretStore> = secrets.into();

    let state = Arc::new(BridgeState::new(
        config,
        config_path,
        queue.clone(),
        registry.clone(),
        door.clone(),
        pipeline.clone(),
        cloud.clone(),
        notifier,
        tier_rx.clone(),
        secrets.clone(),
        shutdown.clone(),
    ));

    spawn_background_tasks(&state, tier_detector, emit_rx, device_id);

    install_signal_handlers(shutdown.clone());

    http::serve(state).await
}

fn spawn_background_tasks(
    state: &Arc<BridgeState>,
    tier_detector: Arc<TierDetector>,
    mut emit_rx: tokio::sync::mpsc::Receiver<model::Event>,
    device_id: String,
) {
    let shutdown = state.shutdown.clone();

    tokio::spawn(tier_detector.clone().run(TIER_SAMPLE_INTERVAL, shutdown.clone()));
    tokio::spawn(resize_queue_on_tier_change(state.queue.clone(), state.tier.clone(), shutdown.clone()));

    {
        let registry = state.registry.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move { registry.run_watchdog(ADAPTER_WATCHDOG_INTERVAL, cancel).await });
    }

    tokio::spawn(state.door.clone().run_sweep(shutdown.clone()));

    let management_rx = state.cloud.spawn(shutdown.clone());
    tokio::spawn(run_management_consumer(state.clone(), management_rx));

    {
        let pipeline = state.pipeline.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = emit_rx.recv() => {
                        let Some(event) = event else { break };
                        if let Err(err) = pipeline.ingest(event, &device_id).await {
                            tracing::debug!(?err, "event rejected by ingestion pipeline");
                        }
                    }
                }
            }
        });
    }
}

/// Track tier changes and resize the queue's capacity to match, unless an
/// explicit `queue_max_size` override is configured (read fresh each time
/// since it can change via config reload).
async fn resize_queue_on_tier_change(
    queue: Arc<DurableQueue>,
    mut tier_rx: tokio::sync::watch::Receiver<Tier>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = tier_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let tier = *tier_rx.borrow();
                queue.set_capacity(tier.queue_capacity());
            }
        }
    }
}

async fn run_management_consumer(state: Arc<BridgeState>, mut rx: tokio::sync::mpsc::Receiver<ManagementCommand>) {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            command = rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    ManagementCommand::ReloadConfig => reload_config(&state).await,
                    ManagementCommand::Unpair => unpair(&state).await,
                }
            }
        }
    }
}

async fn reload_config(state: &Arc<BridgeState>) {
    match Config::load(&state.config_path) {
        Ok(loaded) => {
            *state.config.write().await = loaded;
            tracing::info!("config reloaded via remote command");
        }
        Err(err) => tracing::warn!(%err, "remote reload_config failed to load config from disk"),
    }
}

async fn unpair(state: &Arc<BridgeState>) {
    state.cloud.clear_identity().await;
    if let Err(err) = state.secrets.clear() {
        tracing::warn!(%err, "failed to clear secret store during remote unpair");
    }
    let mut config = state.config.write().await;
    config.device_id = None;
    config.device_key = None;
    if let Err(err) = config.save(&state.config_path) {
        tracing::warn!(%err, "failed to persist config during remote unpair");
    }
}

#[cfg(unix)]
fn install_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
        }
        shutdown.cancel();
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
        }
        shutdown.cancel();
    });
}

/// Exchange a pair code for a device identity and persist it, without
/// starting the full daemon — used by the `pair` CLI subcommand.
pub async fn pair_cli(config_path: &Path, pair_code: &str) -> anyhow::Result<DeviceIdentity> {
    let mut config = Config::load(config_path)?;
    let server_url =
        config.server_url.clone().ok_or_else(|| anyhow::anyhow!("server_url is not set in config"))?;

    let identity = cloud::pairing::pair(&server_url, pair_code).await?;

    let data_dir = config.queue_dir();
    std::fs::create_dir_all(&data_dir)?;
    let secrets = secret::open(&data_dir);
    secrets.save(&identity)?;

    config.device_id = Some(identity.device_id.clone());
    config.device_key = Some(identity.hmac_key.clone());
    config.server_url = Some(identity.server_url.clone());
    config.save(config_path)?;

    Ok(identity)
}

/// Wipe the local device identity without starting the full daemon — used
/// by the `unpair` CLI subcommand.
pub async fn unpair_cli(config_path: &Path) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    let data_dir = config.queue_dir();
    let secrets = secret::open(&data_dir);
    secrets.clear()?;
    config.device_id = None;
    config.device_key = None;
    config.save(config_path)?;
    Ok(())
}
