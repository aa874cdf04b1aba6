// SPDX-License-Identifier: Apache-2.0

//! Control-plane notifications: the one channel every subsystem publishes
//! through to reach the HTTP control plane's WebSocket fanout (spec §4.4,
//! §4.6, §4.7), instead of holding direct references to each other (spec
//! §9's note against cyclic references).

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{AdapterStatus, DoorState, Event};

pub const NOTIFY_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlEvent {
    EventCreated(Event),
    DoorUnlock(DoorState),
    DoorLock(DoorState),
    DoorStatus(DoorState),
    AdapterStatusChanged(AdapterStatus),
}

pub type Notifier = broadcast::Sender<ControlEvent>;

pub fn channel() -> (Notifier, broadcast::Receiver<ControlEvent>) {
    broadcast::channel(NOTIFY_CHANNEL_CAPACITY)
}
