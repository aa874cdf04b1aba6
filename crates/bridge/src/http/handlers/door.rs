// SPDX-License-Identifier: Apache-2.0

//! `POST /api/v1/door/{unlock,lock}`, `GET /api/v1/door/status` (spec §4.6/§4.7).

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::model::DoorState;
use crate::state::BridgeState;

const DEFAULT_REQUESTED_BY: &str = "api";

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub duration_ms: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub adapter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub adapter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoorStatusResponse {
    #[serde(flatten)]
    pub state: DoorState,
}

fn requested_by(headers: &HeaderMap) -> String {
    headers.get("x-requested-by").and_then(|v| v.to_str().ok()).unwrap_or(DEFAULT_REQUESTED_BY).to_owned()
}

pub async fn unlock(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    Json(body): Json<UnlockRequest>,
) -> axum::response::Response {
    let reason = body.reason.as_deref().unwrap_or("manual_api");
    let by = requested_by(&headers);
    match state.door.unlock(body.duration_ms, reason, &by, body.adapter.as_deref()).await {
        Ok(()) => Json(DoorStatusResponse { state: state.door.status().await }).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn lock(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    Json(body): Json<LockRequest>,
) -> axum::response::Response {
    let reason = body.reason.as_deref().unwrap_or("manual_api");
    let by = requested_by(&headers);
    match state.door.lock(reason, &by, body.adapter.as_deref()).await {
        Ok(()) => Json(DoorStatusResponse { state: state.door.status().await }).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn status(State(state): State<Arc<BridgeState>>) -> Json<DoorStatusResponse> {
    Json(DoorStatusResponse { state: state.door.status().await })
}
