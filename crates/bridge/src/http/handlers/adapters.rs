// SPDX-License-Identifier: Apache-2.0

//! `GET /api/v1/adapters`, `POST /api/v1/adapters/{name}/{enable,disable}`,
//! `PUT /api/v1/adapters/{name}/config` (spec §4.3/§4.7).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::BridgeState;

pub async fn list(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    Json(state.registry.status_all().await)
}

pub async fn status(State(state): State<Arc<BridgeState>>, Path(name): Path<String>) -> impl IntoResponse {
    match state.registry.status_of(&name).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct EnableResponse {
    pub requires_restart: bool,
}

pub async fn enable(State(state): State<Arc<BridgeState>>, Path(name): Path<String>) -> impl IntoResponse {
    match state.registry.enable(&name).await {
        Ok(requires_restart) => Json(EnableResponse { requires_restart }).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn disable(State(state): State<Arc<BridgeState>>, Path(name): Path<String>) -> impl IntoResponse {
    match state.registry.disable(&name).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Persists the adapter's config into the in-memory config and on disk; the
/// registry itself is not live-reconfigured here — a `requires_restart`
/// adapter only picks up the change on its next `enable` (spec §4.3).
pub async fn update_config(
    State(state): State<Arc<BridgeState>>,
    Path(name): Path<String>,
    Json(body): Json<crate::config::AdapterConfig>,
) -> impl IntoResponse {
    let mut config = state.config.write().await;
    config.adapter_configs.insert(name, body);
    if let Err(err) = config.save(&state.config_path) {
        tracing::warn!(%err, "failed to persist adapter config update");
        return crate::error::BridgeError::StorageError.into_response();
    }
    axum::http::StatusCode::NO_CONTENT.into_response()
}
