// SPDX-License-Identifier: Apache-2.0

//! Per-client-IP token bucket (spec §4.7). Hand-rolled rather than pulling
//! in `governor` — the bucket is a small `Mutex<HashMap>` in the same style
//! as the adapter registry's slot map, not worth a new dependency for.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;

use crate::error::BridgeError;
use crate::state::BridgeState;
use crate::util::epoch_millis;

struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

pub struct RateLimiter {
    requests_per_minute: u32,
    burst_size: u32,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self { requests_per_minute, burst_size, buckets: Mutex::new(HashMap::new()) }
    }

    /// Attempt to take one token for `addr`. Returns `Ok(())` if allowed, or
    /// `Err(retry_after)` with the wait until the next token is available.
    async fn check(&self, addr: IpAddr) -> Result<(), Duration> {
        let refill_per_ms = self.requests_per_minute as f64 / 60_000.0;
        let now = epoch_millis();

        #[allow(clippy::unwrap_used)]
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(addr).or_insert_with(|| Bucket {
            tokens: self.burst_size as f64,
            last_refill_ms: now,
        });

        let elapsed = now.saturating_sub(bucket.last_refill_ms) as f64;
        bucket.tokens = (bucket.tokens + elapsed * refill_per_ms).min(self.burst_size as f64);
        bucket.last_refill_ms = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_ms = (deficit / refill_per_ms).ceil() as u64;
            Err(Duration::from_millis(wait_ms.max(1)))
        }
    }

    /// Drop buckets that have been idle past `max_idle`, bounding memory use
    /// under a churn of distinct client IPs.
    pub async fn cleanup(&self, max_idle: Duration) {
        let now = epoch_millis();
        #[allow(clippy::unwrap_used)]
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, bucket| now.saturating_sub(bucket.last_refill_ms) < max_idle.as_millis() as u64);
    }
}

pub async fn rate_limit_layer(
    State(state): State<Arc<BridgeState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let config = state.config.read().await.api_server.rate_limit.clone();
    if !config.enabled {
        return next.run(req).await;
    }

    match state.rate_limiter.check(addr.ip()).await {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            let error = BridgeError::RateLimitExceeded;
            let mut response = error.to_http_response("rate limit exceeded").into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
            *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_allows_up_to_burst_size() {
        let limiter = RateLimiter::new(60, 3);
        let addr: IpAddr = "127.0.0.1".parse().expect("ip");
        for _ in 0..3 {
            limiter.check(addr).await.expect("within burst");
        }
        assert!(limiter.check(addr).await.is_err());
    }

    #[tokio::test]
    async fn distinct_ips_have_independent_buckets() {
        let limiter = RateLimiter::new(60, 1);
        let a: IpAddr = "127.0.0.1".parse().expect("ip");
        let b: IpAddr = "127.0.0.2".parse().expect("ip");
        limiter.check(a).await.expect("a first");
        limiter.check(b).await.expect("b independent");
    }
}
