// SPDX-License-Identifier: Apache-2.0

//! CORS (spec §4.7). The teacher reaches for `tower_http::cors::CorsLayer`
//! but builds it once at startup; this bridge's CORS policy is part of the
//! hot-reloadable config, so it's read per-request the same way
//! `security_headers_layer` and `rate_limit_layer` read theirs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::BridgeState;

pub async fn cors_layer(State(state): State<Arc<BridgeState>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let config = state.config.read().await.api_server.cors.clone();
    if !config.enabled {
        return next.run(req).await;
    }

    let origin = req.headers().get("origin").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let is_preflight = req.method() == Method::OPTIONS;

    let mut response = if is_preflight { StatusCode::OK.into_response() } else { next.run(req).await };

    let allow_origin = match origin {
        Some(origin) if config.allowed_origins.iter().any(|o| o == "*" || o == &origin) => Some(origin),
        _ if config.allowed_origins.iter().any(|o| o == "*") => Some("*".to_owned()),
        _ => None,
    };

    if let Some(origin) = allow_origin {
        if let Ok(value) = HeaderValue::from_str(&origin) {
            response.headers_mut().insert("access-control-allow-origin", value);
        }
        if config.allow_credentials {
            response.headers_mut().insert("access-control-allow-credentials", HeaderValue::from_static("true"));
        }
        if !config.allowed_methods.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&config.allowed_methods.join(", ")) {
                response.headers_mut().insert("access-control-allow-methods", value);
            }
        }
        if !config.allowed_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&config.allowed_headers.join(", ")) {
                response.headers_mut().insert("access-control-allow-headers", value);
            }
        }
        if !config.exposed_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&config.exposed_headers.join(", ")) {
                response.headers_mut().insert("access-control-expose-headers", value);
            }
        }
        if config.max_age > 0 {
            if let Ok(value) = HeaderValue::from_str(&config.max_age.to_string()) {
                response.headers_mut().insert("access-control-max-age", value);
            }
        }
    }

    response
}
