// SPDX-License-Identifier: Apache-2.0

//! Local HTTP control-plane auth (spec §4.7): any of three methods is
//! accepted — `X-API-Key`, HMAC signature (same canonical form cloud
//! transport uses), or a bearer JWT. An allowed-CIDR list gates before auth
//! is even attempted.
//!
//! Exempt paths: `/api/v1/health` and the WebSocket upgrade (`/api/v1/ws`) —
//! WS auth, when enabled, is validated via query param instead (spec's Open
//! Question #2 decision, see `DESIGN.md`).

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::error::BridgeError;
use crate::signing;
use crate::state::BridgeState;
use crate::util::{constant_time_eq, epoch_millis};

const EXEMPT_PATHS: &[&str] = &["/api/v1/health", "/api/v1/ws"];

/// Signed requests older or newer than this relative to now are rejected
/// (independent of the cloud transport's own clock-skew clamp for events).
const SIGNATURE_TOLERANCE_MS: u64 = 5 * 60_000;

#[derive(Debug, Deserialize)]
struct Claims {
    exp: usize,
}

pub fn validate_api_key(headers: &HeaderMap, config: &AuthConfig) -> bool {
    let Some(provided) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) else { return false };
    config.api_keys.iter().any(|key| constant_time_eq(key.as_bytes(), provided.as_bytes()))
}

pub fn validate_jwt(headers: &HeaderMap, config: &AuthConfig) -> bool {
    let Some(secret) = config.jwt_secret.as_deref() else { return false };
    let Some(header) = headers.get("authorization").and_then(|v| v.to_str().ok()) else { return false };
    let Some(token) = header.strip_prefix("Bearer ") else { return false };

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default()).is_ok()
}

pub fn validate_hmac(method: &str, path: &str, headers: &HeaderMap, body: &[u8], config: &AuthConfig) -> bool {
    let Some(secret) = config.hmac_secret.as_deref() else { return false };
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(timestamp), Some(nonce), Some(signature)) =
        (header_str("x-timestamp"), header_str("x-nonce"), header_str("x-signature"))
    else {
        return false;
    };

    if let Ok(parsed) = timestamp.parse::<i64>() {
        let now = epoch_millis() as i64;
        if (now - parsed).unsigned_abs() > SIGNATURE_TOLERANCE_MS {
            return false;
        }
    }

    let canonical = signing::canonical_string(method, path, timestamp, nonce, body);
    signing::verify(secret, &canonical, signature)
}

/// Coarse allow-list check: entries are either an exact IP or a `prefix/bits`
/// IPv4 CIDR. An empty list means "allow any" (gate disabled).
pub fn ip_allowed(addr: IpAddr, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    allowed.iter().any(|entry| match entry.split_once('/') {
        Some((network, bits)) => ipv4_in_cidr(addr, network, bits),
        None => entry.parse::<IpAddr>().map(|ip| ip == addr).unwrap_or(false),
    })
}

fn ipv4_in_cidr(addr: IpAddr, network: &str, bits: &str) -> bool {
    let (IpAddr::V4(addr), Ok(network)) = (addr, network.parse::<std::net::Ipv4Addr>()) else { return false };
    let Ok(bits) = bits.parse::<u32>() else { return false };
    if bits > 32 {
        return false;
    }
    let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
    (u32::from(addr) & mask) == (u32::from(network) & mask)
}

pub async fn auth_layer(
    State(state): State<Arc<BridgeState>>,
    ConnectInfo(socket_addr): ConnectInfo<std::net::SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    if EXEMPT_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }

    let auth_config = state.config.read().await.api_server.auth.clone();

    if !ip_allowed(socket_addr.ip(), &auth_config.allowed_ips) {
        return BridgeError::IpBlocked.into_response();
    }

    if !auth_config.enabled {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => return BridgeError::InvalidJson.into_response(),
    };

    let authorized = validate_api_key(&parts.headers, &auth_config)
        || validate_jwt(&parts.headers, &auth_config)
        || validate_hmac(&method, &path, &parts.headers, &bytes, &auth_config);

    if !authorized {
        return BridgeError::Unauthorized.into_response();
    }

    let req = Request::from_parts(parts, axum::body::Body::from(bytes));
    next.run(req).await
}

/// Validate a WebSocket upgrade's `?token=` query param against the configured
/// API keys — the simplest of the three methods, since browsers can't set
/// custom headers on a WS handshake (spec §4.7, Open Question #2 decision).
pub fn validate_ws_query(query: &str, config: &AuthConfig) -> Result<(), StatusCode> {
    if !config.enabled {
        return Ok(());
    }
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if config.api_keys.iter().any(|key| constant_time_eq(key.as_bytes(), value.as_bytes())) {
                return Ok(());
            }
        }
    }
    Err(StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_allowed_empty_list_allows_everything() {
        assert!(ip_allowed("10.0.0.5".parse().expect("ip"), &[]));
    }

    #[test]
    fn ip_allowed_matches_exact() {
        let allowed = vec!["10.0.0.5".to_owned()];
        assert!(ip_allowed("10.0.0.5".parse().expect("ip"), &allowed));
        assert!(!ip_allowed("10.0.0.6".parse().expect("ip"), &allowed));
    }

    #[test]
    fn ip_allowed_matches_cidr() {
        let allowed = vec!["10.0.0.0/24".to_owned()];
        assert!(ip_allowed("10.0.0.200".parse().expect("ip"), &allowed));
        assert!(!ip_allowed("10.0.1.1".parse().expect("ip"), &allowed));
    }

    #[test]
    fn api_key_validates_with_constant_time_compare() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret-key".parse().expect("header"));
        let config = AuthConfig { api_keys: vec!["secret-key".to_owned()], ..Default::default() };
        assert!(validate_api_key(&headers, &config));
    }

    #[test]
    fn hmac_round_trips_through_validate() {
        let config = AuthConfig { hmac_secret: Some("shared".to_owned()), ..Default::default() };
        let signed = signing::build("shared", "GET", "/api/v1/health", b"");
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", signed.timestamp.parse().expect("header"));
        headers.insert("x-nonce", signed.nonce.parse().expect("header"));
        headers.insert("x-signature", signed.signature.parse().expect("header"));
        assert!(validate_hmac("GET", "/api/v1/health", &headers, b"", &config));
    }
}
