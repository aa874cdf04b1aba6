// SPDX-License-Identifier: Apache-2.0

//! Durable Queue (component B): the single point through which every
//! ingested [`Event`] passes on its way to the cloud, per spec §4.2/§4.4.
//!
//! Backed by [`store::JournalStore`] for crash-durability and
//! [`dedup::DedupWindow`] for duplicate suppression. Capacity is
//! tier-dependent and adjusted live as the tier detector reclassifies the
//! host (spec §4.1).

pub(crate) mod dedup;
mod store;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

use crate::error::BridgeError;
use crate::model::{Event, QueueEntry, QueueState, ReservationToken};
use crate::util::epoch_millis;
use dedup::DedupWindow;
use store::JournalStore;

/// Retries before an entry is moved to the dead-letter sub-store, per spec §4.2.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Hard cap on entries returned by a single [`DurableQueue::query`] page, per spec §4.2.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Outcome of [`DurableQueue::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    /// A `denied` event displaced the oldest non-`denied` pending entry to fit.
    AcceptedWithEviction { evicted_event_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub depth: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub sent: u64,
    pub failed: usize,
    pub capacity: usize,
    pub dedup_window_len: usize,
    pub oldest_pending_age_ms: Option<u64>,
}

/// Criteria shared by [`DurableQueue::query`] and [`DurableQueue::clear`]
/// (spec §4.2): time range, event type, user, and simulated-flag filters, on
/// top of the existing state/device/limit/offset ones.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub state: Option<QueueState>,
    pub device_id: Option<String>,
    pub event_type: Option<crate::model::EventType>,
    pub external_user_id: Option<String>,
    pub is_simulated: Option<bool>,
    pub min_timestamp: Option<u64>,
    pub max_timestamp: Option<u64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueueFilter {
    fn matches(&self, entry: &QueueEntry) -> bool {
        self.state.map_or(true, |s| entry.state == s)
            && self.device_id.as_deref().map_or(true, |d| entry.event.device_id == d)
            && self.event_type.map_or(true, |t| entry.event.event_type == t)
            && self.external_user_id.as_deref().map_or(true, |u| entry.event.external_user_id == u)
            && self.is_simulated.map_or(true, |sim| entry.event.is_simulated == sim)
            && self.min_timestamp.map_or(true, |min| entry.event.timestamp >= min)
            && self.max_timestamp.map_or(true, |max| entry.event.timestamp <= max)
    }
}

struct Inner {
    entries: HashMap<String, QueueEntry>,
    /// FIFO order of event ids, oldest first. Entries stay in place across
    /// a reservation round so per-adapter FIFO survives it; they're removed
    /// only on confirm, eviction, or dead-letter transition.
    order: VecDeque<String>,
    dedup: DedupWindow,
    store: JournalStore,
    /// reservation token -> deadline (epoch ms). Swept by
    /// [`DurableQueue::sweep_expired_reservations`].
    reservations: HashMap<String, u64>,
}

pub struct DurableQueue {
    inner: Mutex<Inner>,
    capacity: AtomicUsize,
    /// Lifetime count of entries successfully delivered, tracked independently
    /// of `entries` since `confirm` removes them from the store (spec §4.2/§8).
    sent: AtomicU64,
}

impl DurableQueue {
    pub fn open(dir: &std::path::Path, capacity: usize) -> anyhow::Result<Self> {
        let (store, mut entries) = JournalStore::open(dir)?;

        // No reservation survives a restart (spec §4.2): any entry left
        // in_flight from a prior run goes back to pending.
        for entry in entries.values_mut() {
            if entry.state == QueueState::InFlight {
                entry.state = QueueState::Pending;
                entry.reservation = None;
            }
        }

        let mut order: Vec<(String, u64)> =
            entries.iter().map(|(id, e)| (id.clone(), e.created_at)).collect();
        order.sort_by_key(|(_, created_at)| *created_at);
        let order = order.into_iter().map(|(id, _)| id).collect();

        let mut dedup = DedupWindow::new();
        let seen: HashMap<String, u64> =
            entries.iter().map(|(id, e)| (id.clone(), e.created_at)).collect();
        dedup.seed(seen);

        Ok(Self {
            inner: Mutex::new(Inner { entries, order, dedup, store, reservations: HashMap::new() }),
            capacity: AtomicUsize::new(capacity),
            sent: AtomicU64::new(0),
        })
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a freshly ingested event. Rejects exact-duplicate `event_id`s
    /// within the dedup window (spec §4.2). At capacity, a non-`denied`
    /// event is rejected with `QueueFull` outright (backpressure is the
    /// ingestion pipeline's job, spec §5); a `denied` event always gets in,
    /// evicting the oldest non-`denied` pending entry if one exists (spec §8
    /// boundary behavior).
    pub fn append(&self, event: Event) -> Result<AppendOutcome, BridgeError> {
        let mut inner = self.lock();
        let now = epoch_millis();

        if inner.dedup.check_and_insert(&event.event_id, now) {
            return Err(BridgeError::Duplicate);
        }

        let capacity = self.capacity.load(Ordering::Relaxed);
        let mut evicted = None;
        if inner.entries.len() >= capacity {
            if !event.event_type.is_denied() {
                return Err(BridgeError::QueueFull);
            }
            if let Some(victim) = find_evictable(&inner) {
                remove_entry(&mut inner, &victim);
                evicted = Some(victim);
            }
            // No evictable victim (queue is wall-to-wall denials/in-flight):
            // let the denial through anyway, temporarily over capacity.
        }

        let entry = QueueEntry {
            event: event.clone(),
            created_at: now,
            sent_at: None,
            retry_count: 0,
            last_error: None,
            state: QueueState::Pending,
            reservation: None,
        };

        inner.store.put(&entry).map_err(|_| BridgeError::StorageError)?;
        inner.entries.insert(event.event_id.clone(), entry);
        inner.order.push_back(event.event_id);
        maybe_compact(&mut inner);

        match evicted {
            Some(evicted_event_id) => Ok(AppendOutcome::AcceptedWithEviction { evicted_event_id }),
            None => Ok(AppendOutcome::Accepted),
        }
    }

    /// Reserve up to `max_n` oldest pending entries, marking them `InFlight`
    /// under a single reservation token that expires after `max_age` (spec
    /// §4.2 recommends 3x the typical send latency, floored at 30 s; callers
    /// compute that policy and pass it in). Call
    /// [`Self::sweep_expired_reservations`] periodically to return timed-out
    /// reservations to `pending`.
    pub fn reserve_batch(&self, max_n: usize, max_age: Duration) -> (ReservationToken, Vec<QueueEntry>) {
        let mut inner = self.lock();
        let reservation = Uuid::new_v4().to_string();
        let mut batch = Vec::new();

        let ids: Vec<String> = inner
            .order
            .iter()
            .filter(|id| matches!(inner.entries.get(*id).map(|e| e.state), Some(QueueState::Pending)))
            .take(max_n)
            .cloned()
            .collect();

        if ids.is_empty() {
            return (reservation, batch);
        }

        for id in &ids {
            if let Some(entry) = inner.entries.get_mut(id) {
                entry.state = QueueState::InFlight;
                entry.reservation = Some(reservation.clone());
                let snapshot = entry.clone();
                let _ = inner.store.put(&snapshot);
                batch.push(snapshot);
            }
        }
        let deadline = epoch_millis() + max_age.as_millis() as u64;
        inner.reservations.insert(reservation.clone(), deadline);
        (reservation, batch)
    }

    /// Mark a reserved batch delivered; entries are removed from the queue.
    pub fn confirm(&self, reservation: &str, event_ids: &[String]) {
        let mut inner = self.lock();
        let mut confirmed = 0u64;
        for id in event_ids {
            let matches_reservation =
                inner.entries.get(id).and_then(|e| e.reservation.as_deref()) == Some(reservation);
            if matches_reservation {
                remove_entry(&mut inner, id);
                confirmed += 1;
            }
        }
        inner.reservations.remove(reservation);
        maybe_compact(&mut inner);
        drop(inner);
        self.sent.fetch_add(confirmed, Ordering::Relaxed);
    }

    /// Return a reserved batch to `pending` after a failed delivery attempt,
    /// recording the error and incrementing the retry counter (spec §4.5).
    /// Entries that exhaust `max_retries` move to `failed` (dead-letter)
    /// instead of back to `pending`.
    pub fn abandon(&self, reservation: &str, event_ids: &[String], error: &str) {
        self.abandon_with_budget(reservation, event_ids, error, DEFAULT_MAX_RETRIES)
    }

    pub fn abandon_with_budget(
        &self,
        reservation: &str,
        event_ids: &[String],
        error: &str,
        max_retries: u32,
    ) {
        let mut inner = self.lock();
        for id in event_ids {
            let matches_reservation =
                inner.entries.get(id).and_then(|e| e.reservation.as_deref()) == Some(reservation);
            if !matches_reservation {
                continue;
            }
            if let Some(entry) = inner.entries.get_mut(id) {
                entry.retry_count += 1;
                entry.last_error = Some(error.to_owned());
                entry.reservation = None;
                entry.state = if entry.retry_count >= max_retries {
                    QueueState::Failed
                } else {
                    QueueState::Pending
                };
                let snapshot = entry.clone();
                let _ = inner.store.put(&snapshot);
            }
        }
        inner.reservations.remove(reservation);
    }

    /// Revert any reservation whose deadline has passed back to `pending`.
    /// Returns the number of entries recovered.
    pub fn sweep_expired_reservations(&self) -> usize {
        let mut inner = self.lock();
        let now = epoch_millis();
        let expired: Vec<String> = inner
            .reservations
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();

        let mut recovered = 0;
        for token in expired {
            inner.reservations.remove(&token);
            let stale_ids: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.reservation.as_deref() == Some(token.as_str()))
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale_ids {
                if let Some(entry) = inner.entries.get_mut(&id) {
                    entry.state = QueueState::Pending;
                    entry.reservation = None;
                    let snapshot = entry.clone();
                    let _ = inner.store.put(&snapshot);
                    recovered += 1;
                }
            }
        }
        recovered
    }

    /// Filtered, paginated view over the queue (spec §4.2): sorted by
    /// timestamp descending (newest first) by default, `offset`-skipped, and
    /// capped at [`MAX_PAGE_SIZE`] regardless of the requested `limit`.
    pub fn query(&self, filter: &QueueFilter) -> Vec<QueueEntry> {
        let inner = self.lock();
        let mut out: Vec<QueueEntry> =
            inner.order.iter().filter_map(|id| inner.entries.get(id)).filter(|e| filter.matches(e)).cloned().collect();
        out.sort_by(|a, b| b.event.timestamp.cmp(&a.event.timestamp));

        let offset = filter.offset.unwrap_or(0);
        let page = filter.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);
        out.into_iter().skip(offset).take(page).collect()
    }

    /// Delete entries matching `criteria`, returning the count that would be
    /// (or were) removed. No-op, count-only, unless `confirm` is set (spec §4.2).
    pub fn clear(&self, criteria: &QueueFilter, confirm: bool) -> usize {
        let mut inner = self.lock();
        let ids: Vec<String> =
            inner.order.iter().filter(|id| inner.entries.get(*id).map_or(false, |e| criteria.matches(e))).cloned().collect();

        if !confirm {
            return ids.len();
        }

        for id in &ids {
            remove_entry(&mut inner, id);
        }
        ids.len()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let pending = inner.entries.values().filter(|e| e.state == QueueState::Pending).count();
        let in_flight = inner.entries.values().filter(|e| e.state == QueueState::InFlight).count();
        let failed = inner.entries.values().filter(|e| e.state == QueueState::Failed).count();
        let now = epoch_millis();
        let oldest_pending_age_ms = inner
            .entries
            .values()
            .filter(|e| e.state == QueueState::Pending)
            .map(|e| now.saturating_sub(e.created_at))
            .max();
        QueueStats {
            depth: inner.entries.len(),
            pending,
            in_flight,
            sent: self.sent.load(Ordering::Relaxed),
            failed,
            capacity: self.capacity.load(Ordering::Relaxed),
            dedup_window_len: inner.dedup.len(),
            oldest_pending_age_ms,
        }
    }
}

fn find_evictable(inner: &Inner) -> Option<String> {
    inner.order.iter().find_map(|id| {
        let entry = inner.entries.get(id)?;
        let evictable = entry.state == QueueState::Pending && !entry.event.event_type.is_denied();
        evictable.then(|| id.clone())
    })
}

fn remove_entry(inner: &mut Inner, event_id: &str) {
    inner.entries.remove(event_id);
    inner.order.retain(|id| id != event_id);
    let _ = inner.store.remove(event_id);
}

fn maybe_compact(inner: &mut Inner) {
    if inner.store.should_compact() {
        if let Err(err) = inner.store.compact(&inner.entries) {
            tracing::warn!(error = %err, "queue compaction failed");
        }
    }
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
            device_id: "d1".into(),
            adapter_name: "simulator".into(),
            event_type: kind,
            timestamp: epoch_millis(),
            is_simulated: true,
            raw_data: Default::default(),
        }
    }

    #[test]
    fn duplicate_event_id_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 10).expect("open");
        queue.append(event("e1", EventType::Entry)).expect("first accepted");
        let err = queue.append(event("e1", EventType::Entry)).expect_err("duplicate rejected");
        assert_eq!(err, BridgeError::Duplicate);
    }

    #[test]
    fn full_queue_rejects_non_denied_without_eviction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 2).expect("open");
        queue.append(event("e1", EventType::Entry)).expect("e1");
        queue.append(event("e2", EventType::Entry)).expect("e2");
        let err = queue.append(event("e3", EventType::Entry)).expect_err("queue full");
        assert_eq!(err, BridgeError::QueueFull);
        assert_eq!(queue.stats().pending, 2);
    }

    #[test]
    fn denied_event_evicts_oldest_non_denied_pending_at_capacity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 2).expect("open");
        queue.append(event("e1", EventType::Entry)).expect("e1");
        queue.append(event("e2", EventType::Entry)).expect("e2");
        let outcome = queue.append(event("e3", EventType::Denied)).expect("denied evicts e1");
        assert_eq!(outcome, AppendOutcome::AcceptedWithEviction { evicted_event_id: "e1".into() });
        assert_eq!(queue.stats().pending, 2);
    }

    #[test]
    fn denied_event_never_rejected_for_capacity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 1).expect("open");
        queue.append(event("e1", EventType::Denied)).expect("first denied fits");
        // No evictable victim (the only entry is itself a denial), but the
        // new denial must still be accepted.
        let outcome = queue.append(event("e2", EventType::Denied)).expect("denied always accepted");
        assert!(matches!(outcome, AppendOutcome::Accepted));
    }

    #[test]
    fn reserve_confirm_round_trip_removes_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 10).expect("open");
        queue.append(event("e1", EventType::Entry)).expect("e1");
        let (reservation, batch) = queue.reserve_batch(10, Duration::from_secs(30));
        assert_eq!(batch.len(), 1);
        queue.confirm(&reservation, &["e1".to_owned()]);
        assert_eq!(queue.stats().pending, 0);
    }

    #[test]
    fn abandon_returns_entry_to_pending_with_retry_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 10).expect("open");
        queue.append(event("e1", EventType::Entry)).expect("e1");
        let (reservation, _batch) = queue.reserve_batch(10, Duration::from_secs(30));
        queue.abandon(&reservation, &["e1".to_owned()], "network error");
        let entries = queue.query(&QueueFilter::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 1);
        assert_eq!(entries[0].state, QueueState::Pending);
    }

    #[test]
    fn abandon_past_retry_budget_moves_to_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 10).expect("open");
        queue.append(event("e1", EventType::Entry)).expect("e1");
        for _ in 0..3 {
            let (reservation, _batch) = queue.reserve_batch(10, Duration::from_secs(30));
            queue.abandon_with_budget(&reservation, &["e1".to_owned()], "boom", 3);
        }
        let entries = queue.query(&QueueFilter { state: Some(QueueState::Failed), ..Default::default() });
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn expired_reservation_reverts_to_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = DurableQueue::open(dir.path(), 10).expect("open");
        queue.append(event("e1", EventType::Entry)).expect("e1");
        queue.reserve_batch(10, Duration::from_millis(0));
        let recovered = queue.sweep_expired_reservations();
        assert_eq!(recovered, 1);
        assert_eq!(queue.stats().pending, 1);
        assert_eq!(queue.stats().in_flight, 0);
    }

    #[test]
    fn recovers_state_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let queue = DurableQueue::open(dir.path(), 10).expect("open");
            queue.append(event("e1", EventType::Entry)).expect("e1");
        }
        let queue = DurableQueue::open(dir.path(), 10).expect("reopen");
        assert_eq!(queue.stats().pending, 1);
    }

    #[test]
    fn in_flight_recovers_to_pending_on_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let queue = DurableQueue::open(dir.path(), 10).expect("open");
            queue.append(event("e1", EventType::Entry)).expect("e1");
            queue.reserve_batch(10, Duration::from_secs(30));
        }
        let queue = DurableQueue::open(dir.path(), 10).expect("reopen");
        let stats = queue.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_flight, 0);
    }
}
