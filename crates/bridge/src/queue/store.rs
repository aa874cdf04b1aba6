// SPDX-License-Identifier: Apache-2.0

//! On-disk persistence for the durable queue: an append-only JSON-lines
//! journal plus periodic snapshot-and-truncate compaction, in the manner of
//! [`crate::config::Config::save`]'s write-tmp-then-rename pattern.
//!
//! Layout under `database_path`:
//!   - `queue.snapshot` — the full entry set as of the last compaction.
//!   - `queue.log`      — records appended since that snapshot.
//!
//! Recovery replays the snapshot, then the log, in order.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::QueueEntry;

/// One line of the journal: either a full entry write or a tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Record {
    Put { entry: QueueEntry },
    Remove { event_id: String },
}

pub struct JournalStore {
    dir: PathBuf,
    log_file: File,
    /// Records appended since the last compaction; compaction resets this.
    records_since_compaction: u64,
}

const COMPACT_THRESHOLD: u64 = 2_000;

impl JournalStore {
    /// Open (creating if absent) the store at `dir`, replaying the snapshot
    /// and log into an in-memory map keyed by `event_id`.
    pub fn open(dir: &Path) -> anyhow::Result<(Self, HashMap<String, QueueEntry>)> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join("queue.snapshot");
        let log_path = dir.join("queue.log");

        let mut entries: HashMap<String, QueueEntry> = HashMap::new();
        if snapshot_path.exists() {
            let contents = std::fs::read_to_string(&snapshot_path)?;
            if !contents.trim().is_empty() {
                entries = serde_json::from_str(&contents)?;
            }
        }

        if log_path.exists() {
            let file = File::open(&log_path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Record>(&line) {
                    Ok(Record::Put { entry }) => {
                        entries.insert(entry.event.event_id.clone(), entry);
                    }
                    Ok(Record::Remove { event_id }) => {
                        entries.remove(&event_id);
                    }
                    Err(err) => {
                        // A half-written trailing line from a prior crash; stop
                        // replay here rather than failing startup.
                        tracing::warn!(error = %err, "truncated journal record, stopping replay");
                        break;
                    }
                }
            }
        }

        let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        let store = Self { dir: dir.to_owned(), log_file, records_since_compaction: 0 };
        Ok((store, entries))
    }

    pub fn put(&mut self, entry: &QueueEntry) -> anyhow::Result<()> {
        self.append(&Record::Put { entry: entry.clone() })
    }

    pub fn remove(&mut self, event_id: &str) -> anyhow::Result<()> {
        self.append(&Record::Remove { event_id: event_id.to_owned() })
    }

    fn append(&mut self, record: &Record) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.log_file.write_all(line.as_bytes())?;
        self.log_file.flush()?;
        self.records_since_compaction += 1;
        Ok(())
    }

    /// Whether enough records have accumulated to warrant a compaction pass.
    pub fn should_compact(&self) -> bool {
        self.records_since_compaction >= COMPACT_THRESHOLD
    }

    /// Write `entries` as the new snapshot and truncate the log, matching
    /// the `Config::save` write-tmp-then-rename idiom.
    pub fn compact(&mut self, entries: &HashMap<String, QueueEntry>) -> anyhow::Result<()> {
        let snapshot_path = self.dir.join("queue.snapshot");
        let tmp_path = self.dir.join("queue.snapshot.tmp");
        let json = serde_json::to_string(entries)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &snapshot_path)?;

        let log_path = self.dir.join("queue.log");
        self.log_file = OpenOptions::new().create(true).write(true).truncate(true).open(&log_path)?;
        self.records_since_compaction = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventType, QueueState};

    fn sample_entry(id: &str) -> QueueEntry {
        QueueEntry {
            event: Event {
                event_id: id.to_owned(),
                external_user_id: "u1".into(),
                internal_user_id: None,
                device_id: "d1".into(),
                adapter_name: "simulator".into(),
                event_type: EventType::Entry,
                timestamp: 1_000,
                is_simulated: true,
                raw_data: Default::default(),
            },
            created_at: 1_000,
            sent_at: None,
            retry_count: 0,
            last_error: None,
            state: QueueState::Pending,
            reservation: None,
        }
    }

    #[test]
    fn replay_recovers_puts_and_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let (mut store, entries) = JournalStore::open(dir.path()).expect("open");
            assert!(entries.is_empty());
            store.put(&sample_entry("a")).expect("put a");
            store.put(&sample_entry("b")).expect("put b");
            store.remove("a").expect("remove a");
        }
        let (_store, entries) = JournalStore::open(dir.path()).expect("reopen");
        assert!(!entries.contains_key("a"));
        assert!(entries.contains_key("b"));
    }

    #[test]
    fn compact_then_reopen_preserves_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, mut entries) = JournalStore::open(dir.path()).expect("open");
        store.put(&sample_entry("a")).expect("put a");
        entries.insert("a".into(), sample_entry("a"));
        store.compact(&entries).expect("compact");
        assert!(!store.should_compact());

        let (_store, reloaded) = JournalStore::open(dir.path()).expect("reopen");
        assert_eq!(reloaded.len(), 1);
    }
}
