// SPDX-License-Identifier: Apache-2.0

//! `POST /api/v1/pairing/pair`, `POST /api/v1/pairing/unpair` (spec §4.8).
//! The HTTP-facing half of pairing — the cloud exchange itself lives in
//! [`crate::cloud::pairing`]. Persist-then-activate order matters: a crash
//! between the two must never leave the daemon thinking it's paired when
//! the secret store disagrees (spec §8 identity atomicity invariant).

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::cloud::pairing;
use crate::error::BridgeError;
use crate::state::BridgeState;

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub server_url: String,
    pub pair_code: String,
}

#[derive(Debug, Serialize)]
pub struct PairResponse {
    pub device_id: String,
    pub paired_at: u64,
}

pub async fn pair(State(state): State<Arc<BridgeState>>, Json(body): Json<PairRequest>) -> impl IntoResponse {
    let identity = match pairing::pair(&body.server_url, &body.pair_code).await {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = state.secrets.save(&identity) {
        tracing::error!(%err, "failed to persist device identity after pairing");
        return BridgeError::StorageError.into_response();
    }

    state.cloud.set_identity(identity.clone()).await;

    {
        let mut config = state.config.write().await;
        config.device_id = Some(identity.device_id.clone());
        config.device_key = Some(identity.hmac_key.clone());
        config.server_url = Some(identity.server_url.clone());
        if let Err(err) = config.save(&state.config_path) {
            tracing::warn!(%err, "failed to mirror device identity into config");
        }
    }

    Json(PairResponse { device_id: identity.device_id, paired_at: identity.paired_at }).into_response()
}

pub async fn unpair(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    state.cloud.clear_identity().await;
    if let Err(err) = state.secrets.clear() {
        tracing::warn!(%err, "failed to clear persisted device identity");
        return BridgeError::StorageError.into_response();
    }

    {
        let mut config = state.config.write().await;
        config.device_id = None;
        config.device_key = None;
        if let Err(err) = config.save(&state.config_path) {
            tracing::warn!(%err, "failed to clear device identity from config");
        }
    }

    axum::http::StatusCode::NO_CONTENT.into_response()
}
