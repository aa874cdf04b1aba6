// SPDX-License-Identifier: Apache-2.0

//! `GET /api/v1/metrics` (spec §4.7). Gated by the tier's feature set — only
//! `normal`/`full` tiers enable it (spec §4.1); `lite` gets a plain 404
//! rather than a half-populated body.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::cloud::circuit::CircuitState;
use crate::error::BridgeError;
use crate::state::BridgeState;

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub uptime_ms: u64,
    pub tier: &'static str,
    pub paired: bool,
    pub circuit_state: &'static str,
    pub queue_depth: usize,
    pub queue_pending: usize,
    pub queue_in_flight: usize,
    pub queue_failed: usize,
    pub queue_capacity: usize,
    pub queue_oldest_pending_age_ms: Option<u64>,
    pub ingestion_total_events: u64,
    pub ingestion_dropped_events: u64,
    pub adapters_running: usize,
    pub adapters_total: usize,
}

pub async fn metrics(State(state): State<Arc<BridgeState>>) -> Response {
    let tier = *state.tier.borrow();
    if !tier.features().metrics {
        return BridgeError::NotFound.into_response();
    }

    let queue_stats = state.queue.stats();
    let ingestion_stats = state.pipeline.stats();
    let adapters = state.registry.status_all().await;
    let adapters_running =
        adapters.iter().filter(|a| a.state == crate::model::AdapterLifecycle::Running).count();

    let circuit_state = match state.cloud.circuit.state() {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::Probing => "probing",
    };

    Json(MetricsResponse {
        uptime_ms: state.uptime_ms(),
        tier: tier.as_str(),
        paired: state.cloud.is_paired().await,
        circuit_state,
        queue_depth: queue_stats.depth,
        queue_pending: queue_stats.pending,
        queue_in_flight: queue_stats.in_flight,
        queue_failed: queue_stats.failed,
        queue_capacity: queue_stats.capacity,
        queue_oldest_pending_age_ms: queue_stats.oldest_pending_age_ms,
        ingestion_total_events: ingestion_stats.total_events,
        ingestion_dropped_events: ingestion_stats.dropped_events,
        adapters_running,
        adapters_total: adapters.len(),
    })
    .into_response()
}
