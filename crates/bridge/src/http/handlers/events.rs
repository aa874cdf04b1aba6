// SPDX-License-Identifier: Apache-2.0

//! `GET/POST /api/v1/events`, `GET /api/v1/events/stats`, `DELETE
//! /api/v1/events` (spec §4.2/§4.4/§4.7) — local queue introspection and
//! manual event injection for adapters that support it (e.g. the simulator).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::model::{Event, EventType, QueueState};
use crate::queue::QueueFilter;
use crate::state::BridgeState;

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub external_user_id: Option<String>,
    #[serde(default)]
    pub is_simulated: Option<bool>,
    #[serde(default)]
    pub min_timestamp: Option<u64>,
    #[serde(default)]
    pub max_timestamp: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

fn parse_state(raw: &str) -> Option<QueueState> {
    match raw {
        "pending" => Some(QueueState::Pending),
        "in_flight" => Some(QueueState::InFlight),
        "sent" => Some(QueueState::Sent),
        "failed" => Some(QueueState::Failed),
        _ => None,
    }
}

fn parse_event_type(raw: &str) -> Option<EventType> {
    match raw {
        "entry" => Some(EventType::Entry),
        "exit" => Some(EventType::Exit),
        "denied" => Some(EventType::Denied),
        _ => None,
    }
}

impl From<ListQuery> for QueueFilter {
    fn from(query: ListQuery) -> Self {
        QueueFilter {
            state: query.state.as_deref().and_then(parse_state),
            device_id: query.device_id,
            event_type: query.event_type.as_deref().and_then(parse_event_type),
            external_user_id: query.external_user_id,
            is_simulated: query.is_simulated,
            min_timestamp: query.min_timestamp,
            max_timestamp: query.max_timestamp,
            limit: query.limit,
            offset: query.offset,
        }
    }
}

pub async fn list(State(state): State<Arc<BridgeState>>, Query(query): Query<ListQuery>) -> impl IntoResponse {
    Json(state.queue.query(&QueueFilter::from(query)))
}

#[derive(Debug, Serialize)]
pub struct EventStatsResponse {
    pub total_events: u64,
    pub dropped_events: u64,
    pub depth: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub sent: u64,
    pub failed: usize,
    pub capacity: usize,
    pub oldest_pending_age_ms: Option<u64>,
}

pub async fn stats(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let ingestion = state.pipeline.stats();
    let queue = state.queue.stats();
    Json(EventStatsResponse {
        total_events: ingestion.total_events,
        dropped_events: ingestion.dropped_events,
        depth: queue.depth,
        pending: queue.pending,
        in_flight: queue.in_flight,
        sent: queue.sent,
        failed: queue.failed,
        capacity: queue.capacity,
        oldest_pending_age_ms: queue.oldest_pending_age_ms,
    })
}

#[derive(Debug, Deserialize)]
pub struct InjectRequest {
    pub adapter: String,
    pub event: Event,
}

pub async fn inject(State(state): State<Arc<BridgeState>>, Json(body): Json<InjectRequest>) -> impl IntoResponse {
    match state.registry.inject_event(&body.adapter, body.event).await {
        Ok(()) => axum::http::StatusCode::ACCEPTED.into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ClearQuery {
    #[serde(flatten)]
    pub filter: ListQuery,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub deleted: usize,
}

/// Deletes entries matching `filter`; without `confirm=true` this only
/// reports how many entries would be deleted (spec §4.2).
pub async fn clear(State(state): State<Arc<BridgeState>>, Query(query): Query<ClearQuery>) -> impl IntoResponse {
    let deleted = state.queue.clear(&QueueFilter::from(query.filter), query.confirm);
    Json(ClearResponse { deleted })
}
