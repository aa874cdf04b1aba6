// SPDX-License-Identifier: Apache-2.0

//! HTTP Control Plane (component G, spec §4.7): the local REST + WebSocket
//! surface operators and the on-box UI use to inspect and drive the bridge.

pub mod auth;
pub mod cors;
pub mod handlers;
pub mod logging;
pub mod ratelimit;
pub mod security;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::state::BridgeState;

pub fn build_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health::health))
        .route("/api/v1/metrics", get(handlers::metrics::metrics))
        .route("/api/v1/door/unlock", post(handlers::door::unlock))
        .route("/api/v1/door/lock", post(handlers::door::lock))
        .route("/api/v1/door/status", get(handlers::door::status))
        .route(
            "/api/v1/events",
            get(handlers::events::list).post(handlers::events::inject).delete(handlers::events::clear),
        )
        .route("/api/v1/events/stats", get(handlers::events::stats))
        .route("/api/v1/adapters", get(handlers::adapters::list))
        .route("/api/v1/adapters/{name}", get(handlers::adapters::status))
        .route("/api/v1/adapters/{name}/enable", post(handlers::adapters::enable))
        .route("/api/v1/adapters/{name}/disable", post(handlers::adapters::disable))
        .route("/api/v1/adapters/{name}/config", put(handlers::adapters::update_config))
        .route("/api/v1/config", get(handlers::config::get).put(handlers::config::put))
        .route("/api/v1/config/reload", post(handlers::config::reload))
        .route("/api/v1/pairing/pair", post(handlers::pairing::pair))
        .route("/api/v1/pairing/unpair", post(handlers::pairing::unpair))
        .route("/api/v1/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(middleware::from_fn_with_state(state.clone(), ratelimit::rate_limit_layer))
        .layer(middleware::from_fn_with_state(state.clone(), security::security_headers_layer))
        .layer(middleware::from_fn_with_state(state.clone(), cors::cors_layer))
        .layer(middleware::from_fn(logging::request_logging_layer))
        .with_state(state)
}

/// Serve the router until `state.shutdown` is cancelled. Bound via
/// `into_make_service_with_connect_info` so handlers and middleware can pull
/// the caller's `SocketAddr` (rate limiting, the IP allow-list).
pub async fn serve(state: Arc<BridgeState>) -> anyhow::Result<()> {
    let (host, port) = {
        let config = state.config.read().await;
        (config.api_server.host.clone(), config.api_server.port)
    };
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http control plane listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
