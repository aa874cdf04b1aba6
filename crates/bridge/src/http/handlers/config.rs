// SPDX-License-Identifier: Apache-2.0

//! `GET/PUT /api/v1/config`, `POST /api/v1/config/reload` (spec §4.7/§6/§9).
//! Secrets are redacted on every read-back; a `PUT` never resets an unset
//! field (`ConfigPatch::apply`'s leave-as-is semantics).

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::config::{Config, ConfigPatch};
use crate::error::BridgeError;
use crate::state::BridgeState;

pub async fn get(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let config = state.config.read().await.clone();
    Json(ConfigPatch::redact(config))
}

pub async fn put(State(state): State<Arc<BridgeState>>, Json(patch): Json<ConfigPatch>) -> impl IntoResponse {
    let mut config = state.config.write().await;
    patch.apply(&mut config);
    if let Err(err) = config.save(&state.config_path) {
        tracing::warn!(%err, "failed to persist config update");
        return BridgeError::ConfigUpdateFailed.into_response();
    }
    Json(ConfigPatch::redact(config.clone())).into_response()
}

/// Reload from disk, discarding any in-memory changes that were never saved.
/// The same operation the cloud's `reload_config` remote command triggers
/// (spec §4.5), exposed here for local operators.
pub async fn reload(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let loaded = match Config::load(&state.config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(%err, "failed to reload config from disk");
            return BridgeError::ConfigInvalid.into_response();
        }
    };
    *state.config.write().await = loaded.clone();
    Json(ConfigPatch::redact(loaded)).into_response()
}
