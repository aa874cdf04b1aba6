// SPDX-License-Identifier: Apache-2.0

//! Shared data model: [`Event`], [`QueueEntry`], [`AdapterStatus`],
//! [`DoorState`], [`DeviceIdentity`], [`Tier`] — spec §3.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An access-control event raised by an adapter. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub external_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_user_id: Option<String>,
    pub device_id: String,
    pub adapter_name: String,
    pub event_type: EventType,
    /// Monotonic UTC, milliseconds.
    pub timestamp: u64,
    #[serde(default)]
    pub is_simulated: bool,
    #[serde(default)]
    pub raw_data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Entry,
    Exit,
    Denied,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Denied => "denied",
        }
    }

    /// `denied` events bypass normal queue/backpressure eviction (spec §4.4/§5).
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Lifecycle state of a [`QueueEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Pending,
    InFlight,
    Sent,
    Failed,
}

/// A queued [`Event`] plus its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub event: Event,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub state: QueueState,
    /// Set while `state == InFlight`; cleared on confirm/abandon or expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationToken>,
}

/// Opaque handle identifying a batch reservation, per the GLOSSARY.
pub type ReservationToken = String;

/// Lifecycle state of an adapter, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterLifecycle {
    Stopped,
    Starting,
    Running,
    Degraded,
    Stopping,
    Error,
}

/// Point-in-time health snapshot for one adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub name: String,
    pub state: AdapterLifecycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: u64,
}

/// Current door state, per spec §3. Readers take a clone as a snapshot;
/// only [`crate::door::DoorController`] mutates the canonical copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoorState {
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unlock_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_lock_at: Option<u64>,
    #[serde(default)]
    pub unlock_count: u64,
    /// Absent or a future epoch-millis timestamp (spec §8 door exclusivity invariant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_until: Option<u64>,
}

/// Device identity issued by the cloud during pairing. Either fully present
/// or entirely absent — see spec §3/§8 identity atomicity invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub hmac_key: String,
    pub server_url: String,
    pub paired_at: u64,
}

/// Host capacity class, per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Lite,
    Normal,
    Full,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lite => "lite",
            Self::Normal => "normal",
            Self::Full => "full",
        }
    }

    /// Pure function of the tier value: queue capacity (spec §4.1).
    pub fn queue_capacity(&self) -> usize {
        match self {
            Self::Lite => 1_000,
            Self::Normal => 10_000,
            Self::Full => 50_000,
        }
    }

    /// Heartbeat cadence (spec §4.1/§4.5).
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        match self {
            Self::Lite => std::time::Duration::from_secs(5 * 60),
            Self::Normal => std::time::Duration::from_secs(60),
            Self::Full => std::time::Duration::from_secs(30),
        }
    }

    /// Batch-sender `max_wait` (spec §4.5).
    pub fn max_batch_wait(&self) -> std::time::Duration {
        match self {
            Self::Lite => std::time::Duration::from_millis(250),
            Self::Normal => std::time::Duration::from_secs(1),
            Self::Full => std::time::Duration::from_secs(5),
        }
    }

    /// Max batch size (spec §4.5).
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::Lite => 100,
            Self::Normal => 500,
            Self::Full => 2_000,
        }
    }

    /// Circuit breaker cooldown (spec §4.5).
    pub fn circuit_cooldown(&self) -> std::time::Duration {
        match self {
            Self::Lite => std::time::Duration::from_secs(30),
            Self::Normal => std::time::Duration::from_secs(60),
            Self::Full => std::time::Duration::from_secs(120),
        }
    }

    /// Feature gates enabled at this tier (spec §4.1).
    pub fn features(&self) -> TierFeatures {
        match self {
            Self::Lite => TierFeatures { webui: false, metrics: false },
            Self::Normal => TierFeatures { webui: true, metrics: false },
            Self::Full => TierFeatures { webui: true, metrics: true },
        }
    }

    /// Classification rule from spec §4.1.
    pub fn classify(cores: usize, ram_bytes: u64) -> Self {
        const GIB: u64 = 1024 * 1024 * 1024;
        if cores < 2 || ram_bytes < 2 * GIB {
            Tier::Lite
        } else if cores > 4 && ram_bytes >= 8 * GIB {
            Tier::Full
        } else {
            Tier::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFeatures {
    pub webui: bool,
    pub metrics: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_lite_below_two_cores() {
        assert_eq!(Tier::classify(1, 8 * 1024 * 1024 * 1024), Tier::Lite);
    }

    #[test]
    fn classify_lite_below_two_gib() {
        assert_eq!(Tier::classify(8, 1024 * 1024 * 1024), Tier::Lite);
    }

    #[test]
    fn classify_normal_boundary_two_cores_two_gib() {
        assert_eq!(Tier::classify(2, 2 * 1024 * 1024 * 1024), Tier::Normal);
    }

    #[test]
    fn classify_normal_four_cores_seven_gib() {
        assert_eq!(Tier::classify(4, 7 * 1024 * 1024 * 1024), Tier::Normal);
    }

    #[test]
    fn classify_full_five_cores_eight_gib() {
        assert_eq!(Tier::classify(5, 8 * 1024 * 1024 * 1024), Tier::Full);
    }

    #[test]
    fn event_type_denied_flag() {
        assert!(EventType::Denied.is_denied());
        assert!(!EventType::Entry.is_denied());
    }
}
