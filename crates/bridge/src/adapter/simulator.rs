// SPDX-License-Identifier: Apache-2.0

//! The `simulator` adapter: synthesizes events on an interval for local
//! testing and demos, and accepts direct event injection from the HTTP
//! control plane (spec §2, §4.3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::driver::SharedStatus;
use super::AdapterContext;
use crate::config::AdapterConfig;
use crate::error::BridgeError;
use crate::model::{AdapterStatus, Event, EventType};
use crate::util::epoch_millis;

pub struct SimulatorAdapter {
    name: String,
    sync_interval: Duration,
    status: Arc<SharedStatus>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    emit: Option<mpsc::Sender<Event>>,
    counter: Arc<AtomicU64>,
}

impl SimulatorAdapter {
    pub fn new(name: &str, config: &AdapterConfig) -> Self {
        Self {
            name: name.to_owned(),
            sync_interval: Duration::from_secs(config.sync_interval.unwrap_or(30)),
            status: SharedStatus::new(name),
            cancel: None,
            handle: None,
            emit: None,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn start(&mut self, ctx: AdapterContext) -> anyhow::Result<()> {
        self.status.set_state(crate::model::AdapterLifecycle::Starting);
        let cancel = CancellationToken::new();
        let status = Arc::clone(&self.status);
        let counter = Arc::clone(&self.counter);
        let interval = self.sync_interval;
        let emit = ctx.emit.clone();
        let name = self.name.clone();
        let device_id = ctx.device_id.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            status.set_state(crate::model::AdapterLifecycle::Running);
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let seq = counter.fetch_add(1, Ordering::Relaxed);
                let event = Event {
                    event_id: Uuid::new_v4().to_string(),
                    external_user_id: format!("sim-user-{seq}"),
                    internal_user_id: None,
                    device_id: device_id.clone(),
                    adapter_name: name.clone(),
                    event_type: EventType::Entry,
                    timestamp: epoch_millis(),
                    is_simulated: true,
                    raw_data: Default::default(),
                };
                if emit.send(event).await.is_err() {
                    break;
                }
                status.record_event();
            }
            status.set_state(crate::model::AdapterLifecycle::Stopped);
        });

        self.cancel = Some(cancel);
        self.handle = Some(handle);
        self.emit = Some(ctx.emit);
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.status.set_state(crate::model::AdapterLifecycle::Stopping);
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn health(&self) -> AdapterStatus {
        self.status.snapshot()
    }

    pub async fn unlock(&self, _duration_ms: u64) -> Result<(), BridgeError> {
        Ok(())
    }

    pub async fn lock(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    pub async fn inject_event(&self, event: Event) -> Result<(), BridgeError> {
        let emit = self.emit.as_ref().ok_or(BridgeError::AdapterDisabled)?;
        emit.send(event).await.map_err(|_| BridgeError::ServiceUnavailable)?;
        self.status.record_event().await;
        Ok(())
    }
}
