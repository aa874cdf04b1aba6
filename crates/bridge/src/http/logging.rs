// SPDX-License-Identifier: Apache-2.0

//! Request logging and audit records (spec §4.7): "every request produces a
//! structured record (method, path, status, duration, client ip, ua, request
//! id); mutations on sensitive paths additionally produce an audit record
//! classified as `data_modification` or `privileged_action`."

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;

/// Classification of a mutating request on a sensitive path, per spec §4.7.
/// `None` for paths that don't warrant an audit record (reads, health, ws).
fn audit_class(method: &Method, path: &str) -> Option<&'static str> {
    if method == Method::GET || method == Method::OPTIONS {
        return None;
    }
    match path {
        "/api/v1/door/unlock" | "/api/v1/door/lock" | "/api/v1/pairing/pair" | "/api/v1/pairing/unpair" => {
            Some("privileged_action")
        }
        "/api/v1/config" | "/api/v1/config/reload" | "/api/v1/events" => Some("data_modification"),
        p if p.starts_with("/api/v1/adapters/") => Some("data_modification"),
        _ => None,
    }
}

pub async fn request_logging_layer(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let ua = req.headers().get("user-agent").and_then(|v| v.to_str().ok()).unwrap_or("-").to_owned();
    let audit = audit_class(&method, &path);

    let started = Instant::now();
    let response = next.run(req).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    tracing::info!(
        %request_id,
        %method,
        %path,
        status,
        duration_ms,
        client_ip = %addr.ip(),
        user_agent = %ua,
        "http request"
    );

    if let Some(class) = audit {
        tracing::info!(
            %request_id,
            %method,
            %path,
            status,
            client_ip = %addr.ip(),
            audit_class = class,
            "audit record"
        );
    }

    response
}
