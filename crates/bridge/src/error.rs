// SPDX-License-Identifier: Apache-2.0

//! The bridge's error taxonomy and HTTP envelope.
//!
//! Every fallible operation in the core returns a [`BridgeError`]. Each
//! variant knows its own HTTP status and machine-readable code so handlers
//! never have to re-derive one from the other.

use std::collections::HashMap;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error taxonomy, per spec §7.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    Unauthorized,
    Forbidden,
    IpBlocked,
    ValidationFailed,
    InvalidJson,
    MissingField,
    InvalidFormat,
    InvalidRange,
    NotFound,
    Conflict,
    ResourceLocked,
    RateLimitExceeded,
    ServiceUnavailable,
    Internal,
    Timeout,
    CircuitOpen,
    HardwareFailure,
    AdapterNotFound,
    AdapterDisabled,
    /// Per-adapter error message for a fanout door operation that partially failed.
    DoorOperationFailed { failures: HashMap<String, String> },
    ConfigInvalid,
    ConfigUpdateFailed,
    StorageError,
    QueueFull,
    Duplicate,
}

impl BridgeError {
    /// HTTP status per the mapping in spec §6.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed
            | Self::InvalidJson
            | Self::MissingField
            | Self::InvalidFormat
            | Self::InvalidRange
            | Self::ConfigInvalid => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::IpBlocked => StatusCode::FORBIDDEN,
            Self::NotFound | Self::AdapterNotFound => StatusCode::NOT_FOUND,
            Self::Conflict | Self::ResourceLocked => StatusCode::CONFLICT,
            Self::AdapterDisabled => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal
            | Self::HardwareFailure
            | Self::DoorOperationFailed { .. }
            | Self::ConfigUpdateFailed
            | Self::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable | Self::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            // QueueFull and Duplicate are surfaced through the ingestion pipeline's
            // own response shape rather than raw HTTP in most call sites, but both
            // map to 409-style conflicts when they do reach the API boundary.
            Self::QueueFull | Self::Duplicate => StatusCode::CONFLICT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::IpBlocked => "IP_BLOCKED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidJson => "INVALID_JSON",
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidRange => "INVALID_RANGE",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::ResourceLocked => "RESOURCE_LOCKED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Internal => "INTERNAL",
            Self::Timeout => "TIMEOUT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::HardwareFailure => "HARDWARE_FAILURE",
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::AdapterDisabled => "ADAPTER_DISABLED",
            Self::DoorOperationFailed { .. } => "DOOR_OPERATION_FAILED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigUpdateFailed => "CONFIG_UPDATE_FAILED",
            Self::StorageError => "STORAGE_ERROR",
            Self::QueueFull => "QUEUE_FULL",
            Self::Duplicate => "DUPLICATE",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        let details = match self {
            Self::DoorOperationFailed { failures } => serde_json::to_value(failures).ok(),
            _ => None,
        };
        ErrorBody {
            error: self.as_str().to_owned(),
            code: self.as_str().to_owned(),
            message: message.into(),
            details,
            timestamp: crate::util::epoch_millis(),
            request_id: None,
            path: None,
            method: None,
            status: self.http_status().as_u16(),
        }
    }

    pub fn to_http_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
        (self.http_status(), Json(self.to_error_body(message)))
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for BridgeError {}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let message = self.as_str().to_lowercase().replace('_', " ");
        let (status, body) = self.to_http_response(message);
        (status, body).into_response()
    }
}

/// Error envelope per spec §6: `{error, code, message, details?, timestamp,
/// request_id?, path?, method?, status}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub status: u16,
}

pub type BridgeResult<T> = Result<T, BridgeError>;
