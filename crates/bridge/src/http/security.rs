// SPDX-License-Identifier: Apache-2.0

//! Security response headers (spec §4.7): HSTS, CSP, X-Frame-Options,
//! X-Content-Type-Options, Referrer-Policy, X-XSS-Protection — all
//! individually configurable since some deployments sit behind a reverse
//! proxy that already sets a subset of these.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::FrameOptions;
use crate::state::BridgeState;

pub async fn security_headers_layer(
    State(state): State<Arc<BridgeState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let security = state.config.read().await.api_server.security.clone();
    let headers = response.headers_mut();

    if security.hsts_enabled {
        let mut value = format!("max-age={}", security.hsts_max_age);
        if security.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if let Ok(header) = HeaderValue::from_str(&value) {
            headers.insert("strict-transport-security", header);
        }
    }

    if security.csp_enabled {
        let directive = security.csp_directive.as_deref().unwrap_or("default-src 'self'");
        if let Ok(header) = HeaderValue::from_str(directive) {
            headers.insert("content-security-policy", header);
        }
    }

    let frame_value = match security.frame_options {
        FrameOptions::Deny => "DENY",
        FrameOptions::SameOrigin => "SAMEORIGIN",
        FrameOptions::AllowFrom => "ALLOW-FROM",
    };
    headers.insert("x-frame-options", HeaderValue::from_static(frame_value));

    if security.content_type_options {
        headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    }

    if security.xss_protection {
        headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    }

    if let Some(policy) = security.referrer_policy.as_deref() {
        if let Ok(header) = HeaderValue::from_str(policy) {
            headers.insert("referrer-policy", header);
        }
    }

    response
}
