// SPDX-License-Identifier: Apache-2.0

//! WebSocket fanout for control-plane events (spec §4.7). One broadcast
//! receiver per connection, filtered by query params, bridged to the socket
//! in a `tokio::select!` loop mirroring the teacher's `handle_ws`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::http::auth::validate_ws_query;
use crate::model::AdapterLifecycle;
use crate::notify::ControlEvent;
use crate::state::BridgeState;

/// Connections whose outbound buffer backs up past this many pending
/// messages are dropped rather than left to grow unbounded.
const SLOW_CONSUMER_BUFFER: usize = 256;

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
    /// Comma-separated subset of `event_created`, `door_unlock`, `door_lock`,
    /// `door_status`, `adapter_status_changed`. Empty/absent means all.
    #[serde(default)]
    pub types: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// One of `info`, `warning`, `critical`. Events below this severity are dropped.
    #[serde(default)]
    pub min_severity: Option<String>,
}

impl WsQuery {
    fn allows(&self, event: &ControlEvent) -> bool {
        if let Some(device_id) = &self.device_id {
            if let Some(event_device_id) = event_device_id(event) {
                if event_device_id != device_id {
                    return false;
                }
            }
        }
        if let Some(user_id) = &self.user_id {
            if let Some(event_user_id) = event_external_user_id(event) {
                if event_user_id != user_id {
                    return false;
                }
            }
        }
        if let Some(min_severity) = self.min_severity.as_deref().and_then(severity_level) {
            if event_severity(event) < min_severity {
                return false;
            }
        }
        match &self.types {
            None => true,
            Some(types) => types.split(',').any(|kind| kind.trim() == event_kind(event)),
        }
    }
}

/// `info` < `warning` < `critical`; unrecognized levels are ignored (no filter applied).
fn severity_level(raw: &str) -> Option<u8> {
    match raw {
        "info" => Some(0),
        "warning" => Some(1),
        "critical" => Some(2),
        _ => None,
    }
}

fn event_severity(event: &ControlEvent) -> u8 {
    match event {
        ControlEvent::EventCreated(event) if event.event_type.is_denied() => 2,
        ControlEvent::EventCreated(_) => 0,
        ControlEvent::DoorUnlock(_) | ControlEvent::DoorLock(_) => 1,
        ControlEvent::DoorStatus(_) => 0,
        ControlEvent::AdapterStatusChanged(status) => match status.state {
            AdapterLifecycle::Error => 2,
            AdapterLifecycle::Degraded => 1,
            _ => 0,
        },
    }
}

fn event_kind(event: &ControlEvent) -> &'static str {
    match event {
        ControlEvent::EventCreated(_) => "event_created",
        ControlEvent::DoorUnlock(_) => "door_unlock",
        ControlEvent::DoorLock(_) => "door_lock",
        ControlEvent::DoorStatus(_) => "door_status",
        ControlEvent::AdapterStatusChanged(_) => "adapter_status_changed",
    }
}

fn event_device_id(event: &ControlEvent) -> Option<&str> {
    match event {
        ControlEvent::EventCreated(event) => Some(event.device_id.as_str()),
        _ => None,
    }
}

fn event_external_user_id(event: &ControlEvent) -> Option<&str> {
    match event {
        ControlEvent::EventCreated(event) => Some(event.external_user_id.as_str()),
        _ => None,
    }
}

pub async fn ws_handler(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let auth_config = state.config.read().await.api_server.auth.clone();
    let raw_token = query.token.clone().unwrap_or_default();
    if validate_ws_query(&format!("token={raw_token}"), &auth_config).is_err() {
        return crate::error::BridgeError::Unauthorized.into_response();
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state, query))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<BridgeState>, query: WsQuery) {
    let mut events = state.notifier.subscribe();
    let mut lagged = 0u64;

    loop {
        tokio::select! {
            biased;

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !query.allows(&event) {
                            continue;
                        }
                        let Ok(payload) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        lagged += skipped;
                        if lagged as usize > SLOW_CONSUMER_BUFFER {
                            tracing::warn!(skipped = lagged, "dropping slow websocket consumer");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
