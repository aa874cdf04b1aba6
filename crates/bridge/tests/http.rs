// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the HTTP control plane.
//!
//! Uses `axum_test::TestServer` over a real random-port transport — needed
//! because the router's auth/rate-limit/logging layers all pull
//! `ConnectInfo<SocketAddr>`, which the default mock transport doesn't supply.

use std::sync::Arc;
use std::time::Duration;

use axum_test::{TestServer, TestServerConfig, Transport};
use tokio_util::sync::CancellationToken;

use bridge::adapter::AdapterRegistry;
use bridge::cloud::CloudTransport;
use bridge::config::{AdapterConfig, Config};
use bridge::door::DoorController;
use bridge::http::build_router;
use bridge::ingestion::enrich::EnrichmentCache;
use bridge::ingestion::Pipeline;
use bridge::model::Tier;
use bridge::notify;
use bridge::queue::DurableQueue;
use bridge::secret;
use bridge::state::BridgeState;

/// Keeps the backing tempdir alive for the harness's lifetime.
struct Harness {
    _dir: tempfile::TempDir,
    state: Arc<BridgeState>,
}

fn simulator_config() -> AdapterConfig {
    AdapterConfig {
        device_type: "simulator".into(),
        connection: serde_json::json!({}),
        device_config: serde_json::json!({}),
        sync_interval: Some(3600),
        requires_restart: false,
    }
}

async fn build_harness(tier: Tier) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config { database_path: dir.path().to_string_lossy().into_owned(), ..Config::default() };
    config.enabled_adapters = vec!["sim1".to_owned()];
    config.adapter_configs.insert("sim1".to_owned(), simulator_config());

    let secret_store = secret::open(dir.path());
    let identity = secret_store.load().expect("load identity");
    let secrets: Arc<dyn secret::SecretStore> = secret_store.into();

    let queue = Arc::new(DurableQueue::open(dir.path(), tier.queue_capacity()).expect("open queue"));
    let (registry, mut emit_rx) = AdapterRegistry::new("dev-test", 16);
    let registry = Arc::new(registry);
    registry.start_all(&config.adapter_configs, &config.enabled_adapters).await;

    let (notifier, _events) = notify::channel();
    let door = Arc::new(DoorController::new(registry.clone(), notifier.clone()));
    let enrich = Arc::new(EnrichmentCache::new());
    let pipeline = Arc::new(Pipeline::new(queue.clone(), enrich, notifier.clone()));

    {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            while let Some(event) = emit_rx.recv().await {
                let _ = pipeline.ingest(event, "dev-test").await;
            }
        });
    }

    let (_tier_tx, tier_rx) = tokio::sync::watch::channel(tier);
    let cloud =
        Arc::new(CloudTransport::new(identity, queue.clone(), registry.clone(), door.clone(), tier_rx.clone()));

    let config_path = dir.path().join("config.json");
    let state = Arc::new(BridgeState::new(
        config,
        config_path,
        queue,
        registry,
        door,
        pipeline,
        cloud,
        notifier,
        tier_rx,
        secrets,
        CancellationToken::new(),
    ));

    Harness { _dir: dir, state }
}

fn test_server(state: Arc<BridgeState>) -> TestServer {
    let router = build_router(state);
    let config = TestServerConfig::builder().transport(Transport::HttpRandomPort).build();
    TestServer::new_with_config(router, config).expect("test server")
}

#[tokio::test]
async fn health_reports_unpaired_before_pairing() {
    let harness = build_harness(Tier::Normal).await;
    let server = test_server(harness.state.clone());

    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "unpaired");
    assert_eq!(body["paired"], false);
    assert_eq!(body["tier"], "normal");
}

#[tokio::test]
async fn door_unlock_then_status_reflects_unlocked() {
    let harness = build_harness(Tier::Normal).await;
    let server = test_server(harness.state.clone());

    let resp = server.post("/api/v1/door/unlock").json(&serde_json::json!({"duration_ms": 5000})).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["is_locked"], false);

    let status = server.get("/api/v1/door/status").await;
    status.assert_status_ok();
    let status_body: serde_json::Value = status.json();
    assert_eq!(status_body["is_locked"], false);
}

#[tokio::test]
async fn door_unlock_rejects_out_of_range_duration() {
    let harness = build_harness(Tier::Normal).await;
    let server = test_server(harness.state.clone());

    let resp = server.post("/api/v1/door/unlock").json(&serde_json::json!({"duration_ms": 60_000})).await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inject_event_then_list_shows_it_pending() {
    let harness = build_harness(Tier::Normal).await;
    let server = test_server(harness.state.clone());

    let event = serde_json::json!({
        "event_id": "evt-1",
        "external_user_id": "user-1",
        "device_id": "dev-test",
        "adapter_name": "sim1",
        "event_type": "entry",
        "timestamp": 1_700_000_000_000u64,
        "is_simulated": true,
        "raw_data": {}
    });

    let resp = server.post("/api/v1/events").json(&serde_json::json!({"adapter": "sim1", "event": event})).await;
    resp.assert_status(axum::http::StatusCode::ACCEPTED);

    // Give the ingestion consumer task a moment to drain the emit channel.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let list = server.get("/api/v1/events").await;
    list.assert_status_ok();
    let entries: Vec<serde_json::Value> = list.json();
    assert!(entries.iter().any(|e| e["event"]["event_id"] == "evt-1"));
}

#[tokio::test]
async fn adapters_list_reports_running_simulator() {
    let harness = build_harness(Tier::Normal).await;
    let server = test_server(harness.state.clone());

    let resp = server.get("/api/v1/adapters").await;
    resp.assert_status_ok();
    let adapters: Vec<serde_json::Value> = resp.json();
    assert!(adapters.iter().any(|a| a["name"] == "sim1" && a["state"] == "running"));
}

#[tokio::test]
async fn config_get_redacts_device_key() {
    let harness = build_harness(Tier::Normal).await;
    {
        let mut config = harness.state.config.write().await;
        config.device_key = Some("supersecret".to_owned());
    }
    let server = test_server(harness.state.clone());

    let resp = server.get("/api/v1/config").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["device_key"], "***");
}

#[tokio::test]
async fn config_put_leaves_unset_fields_untouched() {
    let harness = build_harness(Tier::Normal).await;
    let server = test_server(harness.state.clone());

    let resp = server.put("/api/v1/config").json(&serde_json::json!({"log_level": "debug"})).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["log_level"], "debug");
    assert_eq!(body["unlock_duration"], 3000);
}

#[tokio::test]
async fn metrics_disabled_on_lite_tier() {
    let harness = build_harness(Tier::Lite).await;
    let server = test_server(harness.state.clone());

    let resp = server.get("/api/v1/metrics").await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_available_on_full_tier() {
    let harness = build_harness(Tier::Full).await;
    let server = test_server(harness.state.clone());

    let resp = server.get("/api/v1/metrics").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["tier"], "full");
    assert_eq!(body["paired"], false);
}

#[tokio::test]
async fn rate_limit_exceeded_returns_429_with_retry_after() {
    let harness = build_harness(Tier::Normal).await;
    {
        let mut config = harness.state.config.write().await;
        config.api_server.rate_limit.requests_per_minute = 60;
        config.api_server.rate_limit.burst_size = 1;
    }
    let server = test_server(harness.state.clone());

    let first = server.get("/api/v1/health").await;
    first.assert_status_ok();

    let second = server.get("/api/v1/health").await;
    second.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().get("retry-after").is_some());
}

#[tokio::test]
async fn ip_blocked_when_outside_allowed_list() {
    let harness = build_harness(Tier::Normal).await;
    {
        let mut config = harness.state.config.write().await;
        config.api_server.auth.allowed_ips = vec!["10.0.0.0/8".to_owned()];
    }
    let server = test_server(harness.state.clone());

    // The test transport connects from 127.0.0.1, outside the allow-list.
    let resp = server.get("/api/v1/door/status").await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn api_key_auth_rejects_missing_key_when_enabled() {
    let harness = build_harness(Tier::Normal).await;
    {
        let mut config = harness.state.config.write().await;
        config.api_server.auth.enabled = true;
        config.api_server.auth.api_keys = vec!["correct-key".to_owned()];
    }
    let server = test_server(harness.state.clone());

    let unauthenticated = server.get("/api/v1/door/status").await;
    unauthenticated.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let authenticated = server.get("/api/v1/door/status").add_header("x-api-key", "correct-key").await;
    authenticated.assert_status_ok();
}

#[tokio::test]
async fn health_remains_exempt_from_auth() {
    let harness = build_harness(Tier::Normal).await;
    {
        let mut config = harness.state.config.write().await;
        config.api_server.auth.enabled = true;
        config.api_server.auth.api_keys = vec!["some-key".to_owned()];
    }
    let server = test_server(harness.state.clone());

    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
}
