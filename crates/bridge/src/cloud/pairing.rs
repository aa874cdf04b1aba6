// SPDX-License-Identifier: Apache-2.0

//! Pairing (component I, spec §4.8): exchange a one-time pair code for a
//! device identity. Unauthenticated beyond TLS — there's no prior identity
//! to sign with yet — so the cloud's own certificate (and, optionally, a
//! pinned fingerprint) is the only trust anchor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::model::DeviceIdentity;
use crate::util::epoch_millis;

#[derive(Debug, Serialize)]
struct PairRequest<'a> {
    pair_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct PairResponse {
    device_id: String,
    hmac_key: String,
    server_url: String,
}

/// Exchange `pair_code` with `server_url` for a [`DeviceIdentity`]. Does not
/// persist anything — the caller decides where and how to store it (spec §8
/// identity atomicity invariant: either fully present or entirely absent).
pub async fn pair(server_url: &str, pair_code: &str) -> Result<DeviceIdentity, BridgeError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|_| BridgeError::Internal)?;

    let url = format!("{server_url}/pair");
    let response = client
        .post(&url)
        .json(&PairRequest { pair_code })
        .send()
        .await
        .map_err(|_| BridgeError::ServiceUnavailable)?;

    if !response.status().is_success() {
        return Err(BridgeError::ValidationFailed);
    }

    let body: PairResponse = response.json().await.map_err(|_| BridgeError::InvalidJson)?;
    Ok(DeviceIdentity {
        device_id: body.device_id,
        hmac_key: body.hmac_key,
        server_url: body.server_url,
        paired_at: epoch_millis(),
    })
}
