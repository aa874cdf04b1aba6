// SPDX-License-Identifier: Apache-2.0

//! Ingestion Pipeline (component D): validate → dedupe → normalize → enrich
//! → enqueue for every event an adapter emits (spec §4.4).

pub mod enrich;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::BridgeError;
use crate::model::Event;
use crate::notify::{ControlEvent, Notifier};
use crate::queue::dedup::DedupWindow;
use crate::queue::DurableQueue;
use crate::util::epoch_millis;
use enrich::EnrichmentCache;

/// Events older or newer than this relative to `now` have their timestamp
/// clamped rather than rejected (spec §3, §4.4).
const MAX_CLOCK_SKEW_MS: u64 = 60_000;

#[derive(Debug, Clone, Default)]
pub struct IngestionStats {
    pub total_events: u64,
    pub dropped_events: u64,
}

pub struct Pipeline {
    dedup: Mutex<DedupWindow>,
    enrich: Arc<EnrichmentCache>,
    queue: Arc<DurableQueue>,
    notifier: Notifier,
    total_events: AtomicU64,
    dropped_events: AtomicU64,
}

impl Pipeline {
    pub fn new(queue: Arc<DurableQueue>, enrich: Arc<EnrichmentCache>, notifier: Notifier) -> Self {
        Self {
            dedup: Mutex::new(DedupWindow::new()),
            enrich,
            queue,
            notifier,
            total_events: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> IngestionStats {
        IngestionStats {
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }

    /// Run one event through the full pipeline. Called from each adapter's
    /// emit channel receiver loop (spec §5: tasks + bounded channels).
    pub async fn ingest(&self, mut event: Event, bridge_device_id: &str) -> Result<(), BridgeError> {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        validate(&mut event)?;

        if self.cheap_duplicate_check(&event.event_id) {
            return Err(BridgeError::Duplicate);
        }

        normalize(&mut event, bridge_device_id);
        self.enrich_event(&mut event);

        match self.queue.append(event.clone()) {
            Ok(_) => {
                let _ = self.notifier.send(ControlEvent::EventCreated(event));
                Ok(())
            }
            Err(BridgeError::Duplicate) => Err(BridgeError::Duplicate),
            Err(BridgeError::QueueFull) => {
                // Denied events are never rejected for capacity by the queue
                // itself (spec §8 boundary behavior), so only non-denied
                // overflow reaches here; count and drop per spec §5(iv).
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event_id = %event.event_id, "queue full, dropping event");
                Err(BridgeError::QueueFull)
            }
            Err(other) => Err(other),
        }
    }

    fn cheap_duplicate_check(&self, event_id: &str) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut dedup = self.dedup.lock().unwrap_or_else(|p| p.into_inner());
        dedup.check_and_insert(event_id, epoch_millis())
    }

    fn enrich_event(&self, event: &mut Event) {
        event.internal_user_id = self.enrich.lookup(&event.external_user_id);
    }
}

/// Validate required fields and clamp out-of-bounds clock skew (spec §4.4
/// step 1). Does not reject on skew — only clamps to now.
fn validate(event: &mut Event) -> Result<(), BridgeError> {
    if event.event_id.trim().is_empty() {
        return Err(BridgeError::MissingField);
    }
    if event.external_user_id.trim().is_empty() {
        return Err(BridgeError::MissingField);
    }
    if event.adapter_name.trim().is_empty() {
        return Err(BridgeError::MissingField);
    }

    let now = epoch_millis();
    let skew = now.abs_diff(event.timestamp);
    if skew > MAX_CLOCK_SKEW_MS {
        tracing::warn!(event_id = %event.event_id, skew_ms = skew, "clamping event timestamp to now");
        event.timestamp = now;
    }

    Ok(())
}

/// Stamp the bridge's own device id and canonicalize fields that can vary
/// across adapters (spec §4.4 step 3).
fn normalize(event: &mut Event, bridge_device_id: &str) {
    event.device_id = bridge_device_id.to_owned();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;

    fn event(id: &str, kind: EventType) -> Event {
        Event {
            event_id: id.to_owned(),
            external_user_id: "u1".into(),
            internal_user_id: None,
            device_id: "adapter-reported".into(),
            adapter_name: "simulator".into(),
            event_type: kind,
            timestamp: epoch_millis(),
            is_simulated: true,
            raw_data: Default::default(),
        }
    }

    fn pipeline() -> (Pipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Arc::new(DurableQueue::open(dir.path(), 10).expect("open queue"));
        let enrich = Arc::new(EnrichmentCache::new());
        let (notifier, _rx) = crate::notify::channel();
        (Pipeline::new(queue, enrich, notifier), dir)
    }

    #[tokio::test]
    async fn happy_path_event_is_enqueued_and_device_id_stamped() {
        let (pipeline, _dir) = pipeline();
        pipeline.ingest(event("e1", EventType::Entry), "bridge-1").await.expect("ingest");
        let entries = pipeline.queue.query(&crate::queue::QueueFilter::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.device_id, "bridge-1");
        assert_eq!(pipeline.stats().total_events, 1);
    }

    #[tokio::test]
    async fn missing_required_field_rejected() {
        let (pipeline, _dir) = pipeline();
        let mut bad = event("e1", EventType::Entry);
        bad.external_user_id.clear();
        let err = pipeline.ingest(bad, "bridge-1").await.expect_err("missing field");
        assert_eq!(err, BridgeError::MissingField);
    }

    #[tokio::test]
    async fn duplicate_within_window_rejected_without_reaching_queue_twice() {
        let (pipeline, _dir) = pipeline();
        pipeline.ingest(event("e1", EventType::Entry), "bridge-1").await.expect("first");
        let err = pipeline.ingest(event("e1", EventType::Entry), "bridge-1").await.expect_err("dup");
        assert_eq!(err, BridgeError::Duplicate);
        assert_eq!(pipeline.queue.query(&crate::queue::QueueFilter::default()).len(), 1);
    }

    #[tokio::test]
    async fn enrichment_fills_internal_user_id_on_hit() {
        let (pipeline, _dir) = pipeline();
        pipeline.enrich.refresh([("u1".to_owned(), "internal-1".to_owned())]);
        pipeline.ingest(event("e1", EventType::Entry), "bridge-1").await.expect("ingest");
        let entries = pipeline.queue.query(&crate::queue::QueueFilter::default());
        assert_eq!(entries[0].event.internal_user_id.as_deref(), Some("internal-1"));
    }

    #[tokio::test]
    async fn clock_skew_beyond_bound_is_clamped_not_rejected() {
        let (pipeline, _dir) = pipeline();
        let mut skewed = event("e1", EventType::Entry);
        skewed.timestamp = 0;
        pipeline.ingest(skewed, "bridge-1").await.expect("clamped, not rejected");
        let entries = pipeline.queue.query(&crate::queue::QueueFilter::default());
        assert!(entries[0].event.timestamp > 0);
    }

    #[tokio::test]
    async fn queue_full_drops_non_denied_event_and_counts_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Arc::new(DurableQueue::open(dir.path(), 1).expect("open queue"));
        let enrich = Arc::new(EnrichmentCache::new());
        let (notifier, _rx) = crate::notify::channel();
        let pipeline = Pipeline::new(queue, enrich, notifier);

        pipeline.ingest(event("e1", EventType::Entry), "bridge-1").await.expect("first fits");
        let err = pipeline.ingest(event("e2", EventType::Entry), "bridge-1").await.expect_err("full");
        assert_eq!(err, BridgeError::QueueFull);
        assert_eq!(pipeline.stats().dropped_events, 1);
    }
}
