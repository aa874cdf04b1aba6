// SPDX-License-Identifier: Apache-2.0

//! `GET /api/v1/health` — unauthenticated liveness probe, modeled on the
//! teacher's `HealthResponse` shape (spec §4.7).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::model::AdapterStatus;
use crate::state::BridgeState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub paired: bool,
    pub tier: &'static str,
    pub uptime_ms: u64,
    pub queue_depth: usize,
    pub adapters: Vec<AdapterStatus>,
}

pub async fn health(State(state): State<Arc<BridgeState>>) -> Json<HealthResponse> {
    let paired = state.cloud.is_paired().await;
    let tier = *state.tier.borrow();
    let status = if !paired {
        "unpaired"
    } else if state.cloud.circuit.state() == crate::cloud::circuit::CircuitState::Open {
        "cloud_unreachable"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        paired,
        tier: tier.as_str(),
        uptime_ms: state.uptime_ms(),
        queue_depth: state.queue.stats().depth,
        adapters: state.registry.status_all().await,
    })
}
