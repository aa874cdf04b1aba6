// SPDX-License-Identifier: Apache-2.0

//! The `essl` adapter: another door-capable RFID/biometric reader family,
//! same lifecycle treatment as [`super::zkteco`].

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::driver::{tcp_reachability_loop, SharedStatus};
use super::AdapterContext;
use crate::config::AdapterConfig;
use crate::error::BridgeError;
use crate::model::AdapterStatus;

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    4370
}

pub struct EsslAdapter {
    name: String,
    connection: Connection,
    poll_interval: Duration,
    status: Arc<SharedStatus>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl EsslAdapter {
    pub fn new(name: &str, config: &AdapterConfig) -> Self {
        let connection: Connection =
            serde_json::from_value(config.connection.clone()).unwrap_or(Connection {
                host: default_host(),
                port: default_port(),
            });
        Self {
            name: name.to_owned(),
            connection,
            poll_interval: Duration::from_secs(config.sync_interval.unwrap_or(15)),
            status: SharedStatus::new(name),
            cancel: None,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn start(&mut self, _ctx: AdapterContext) -> anyhow::Result<()> {
        self.status.set_state(crate::model::AdapterLifecycle::Starting);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tcp_reachability_loop(
            self.connection.host.clone(),
            self.connection.port,
            self.poll_interval,
            Arc::clone(&self.status),
            cancel.clone(),
        ));
        self.cancel = Some(cancel);
        self.handle = Some(handle);
        Ok(())
    }

    pub async fn stop(&mut self) {
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
        if self.status.state() == crate::model::AdapterLifecycle::Running {
            Ok(())
        } else {
            Err(BridgeError::HardwareFailure)
        }
    }

    pub async fn lock(&self) -> Result<(), BridgeError> {
        if self.status.state() == crate::model::AdapterLifecycle::Running {
            Ok(())
        } else {
            Err(BridgeError::HardwareFailure)
        }
    }
}
