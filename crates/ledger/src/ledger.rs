//! Ledger Implementation

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Snapshot of one tracked program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Program identifier, as sent by the program
    pub id: String,
    /// Time of the most recent heartbeat
    pub last_seen_at: DateTime<Utc>,
    /// Whether the current silence episode has been alerted on
    pub alerted: bool,
}

/// A program that crossed the staleness threshold and still awaits its alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleProgram {
    pub id: String,
    /// Identifies the silence episode the alert belongs to
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct EntryState {
    last_seen_at: DateTime<Utc>,
    alerted: bool,
}

impl EntryState {
    fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        !self.alerted && now.signed_duration_since(self.last_seen_at) > threshold
    }
}

/// Last-seen ledger keyed by program id.
///
/// Every operation holds the same exclusive lock for its whole duration, so
/// readers never observe a half-applied heartbeat.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Mutex<HashMap<String, EntryState>>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        info!("Creating in-memory ledger");
        Self::default()
    }

    // Mutations are single in-place field writes, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, EntryState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a heartbeat for `id` at the current time
    pub fn record_heartbeat(&self, id: &str) -> DateTime<Utc> {
        let now = Utc::now();
        self.record_heartbeat_at(id, now);
        now
    }

    /// Record a heartbeat for `id` at `at`, starting a fresh silence episode
    pub fn record_heartbeat_at(&self, id: &str, at: DateTime<Utc>) {
        let mut entries = self.lock();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.last_seen_at = at;
                entry.alerted = false;
            }
            None => {
                debug!("Tracking new program {:?}", id);
                entries.insert(
                    id.to_string(),
                    EntryState {
                        last_seen_at: at,
                        alerted: false,
                    },
                );
            }
        }
    }

    /// Owned copy of every entry, sorted by id
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        let entries = self.lock();
        let mut snapshot: Vec<LedgerEntry> = entries
            .iter()
            .map(|(id, state)| LedgerEntry {
                id: id.clone(),
                last_seen_at: state.last_seen_at,
                alerted: state.alerted,
            })
            .collect();
        drop(entries);

        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Look up a single entry
    pub fn get(&self, id: &str) -> Option<LedgerEntry> {
        self.lock().get(id).map(|state| LedgerEntry {
            id: id.to_string(),
            last_seen_at: state.last_seen_at,
            alerted: state.alerted,
        })
    }

    /// Invoke `f` for every stale, not yet alerted entry and mark it alerted.
    ///
    /// `f` runs while the lock is held: the decision to alert and the flag
    /// update are one atomic step, at the cost of blocking heartbeats for as
    /// long as `f` takes. Returns the number of entries visited.
    pub fn for_each_stale<F>(&self, threshold: Duration, now: DateTime<Utc>, mut f: F) -> usize
    where
        F: FnMut(&str),
    {
        let mut entries = self.lock();
        let mut visited = 0;
        for (id, state) in entries.iter_mut() {
            if state.is_stale(threshold, now) {
                f(id);
                state.alerted = true;
                visited += 1;
            }
        }
        visited
    }

    /// Stale, not yet alerted entries, sorted by id. Does not mutate.
    pub fn collect_stale(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<StaleProgram> {
        let entries = self.lock();
        let mut stale: Vec<StaleProgram> = entries
            .iter()
            .filter(|(_, state)| state.is_stale(threshold, now))
            .map(|(id, state)| StaleProgram {
                id: id.clone(),
                last_seen_at: state.last_seen_at,
            })
            .collect();
        drop(entries);

        stale.sort_by(|a, b| a.id.cmp(&b.id));
        stale
    }

    /// Mark the silence episode that began at `last_seen_at` as alerted.
    ///
    /// Returns false when the entry is gone, already alerted, or a newer
    /// heartbeat has started another episode in the meantime.
    pub fn mark_alerted(&self, id: &str, last_seen_at: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(id) {
            Some(state) if state.last_seen_at == last_seen_at && !state.alerted => {
                state.alerted = true;
                true
            }
            _ => false,
        }
    }

    /// Stop tracking `id`. Returns whether it was tracked.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            info!("Deregistered program {:?}", id);
        }
        removed
    }

    /// Remove every entry silent for longer than `ttl`; returns the removed ids
    pub fn evict_idle(&self, ttl: Duration, now: DateTime<Utc>) -> Vec<String> {
        let mut entries = self.lock();
        let mut evicted = Vec::new();
        entries.retain(|id, state| {
            let keep = now.signed_duration_since(state.last_seen_at) <= ttl;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        drop(entries);

        evicted.sort();
        evicted
    }

    /// Number of tracked programs
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
