use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::metrics::consts::CHANGES_RECORDED_COUNTER;

/// A change a subscriber should react to. No identifier means the whole
/// environment changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub environment_key: String,
    pub identifier: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Position of a subscriber in the change log. Everything recorded after the
/// cursor was taken is newer than it.
pub type Cursor = u64;

#[derive(Debug, Clone, Copy)]
struct Pending {
    seq: u64,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct EnvironmentChanges {
    environment: Option<Pending>,
    identities: HashMap<String, Pending>,
}

impl EnvironmentChanges {
    fn max_seq(&self) -> u64 {
        self.identities
            .values()
            .map(|p| p.seq)
            .chain(self.environment.map(|p| p.seq))
            .max()
            .unwrap_or(0)
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        if self.environment.is_some_and(|p| p.at < cutoff) {
            self.environment = None;
        }
        self.identities.retain(|_, p| p.at >= cutoff);
    }

    fn is_empty(&self) -> bool {
        self.environment.is_none() && self.identities.is_empty()
    }
}

/// In-process change log shared by the write endpoints and the streams.
///
/// Every write gets a sequence number. Entries are upserted per environment and per
/// identity, so repeating a change before it is read collapses into one entry with the
/// newer number. Each stream keeps its own [`Cursor`], so any number of subscribers can
/// read the same key without taking changes away from each other. Entries older than
/// the retention window can no longer matter to any open stream and are dropped on
/// the next write, along with keys left with nothing pending.
#[derive(Debug)]
pub struct ChangeNotificationStore {
    next_seq: AtomicU64,
    changes: DashMap<String, EnvironmentChanges>,
    retention: Duration,
}

impl ChangeNotificationStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            changes: DashMap::new(),
            retention,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    // Must not run while an entry guard is held: retain locks every shard.
    fn sweep(&self, cutoff: DateTime<Utc>) {
        self.changes.retain(|_, changes| {
            changes.prune(cutoff);
            !changes.is_empty()
        });
    }

    /// Number of environment keys with changes still retained.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Cursor a new subscriber starts from: only later changes are delivered.
    pub fn cursor(&self) -> Cursor {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    pub fn record_environment_change(&self, environment_key: &str) {
        let now = Utc::now();
        self.sweep(self.cutoff(now));
        let mut entry = self.changes.entry(environment_key.to_string()).or_default();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        entry.environment = Some(Pending { seq, at: now });
        // superseded by the environment change
        entry.identities.clear();
        metrics::counter!(CHANGES_RECORDED_COUNTER, "kind" => "environment").increment(1);
        tracing::debug!(environment_key, seq, "environment change recorded");
    }

    pub fn record_identity_changes<I, S>(&self, environment_key: &str, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        self.sweep(self.cutoff(now));
        let mut entry = self.changes.entry(environment_key.to_string()).or_default();
        let mut recorded = 0u64;
        for identifier in identifiers {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            entry
                .identities
                .insert(identifier.into(), Pending { seq, at: now });
            recorded += 1;
        }
        metrics::counter!(CHANGES_RECORDED_COUNTER, "kind" => "identity").increment(recorded);
        tracing::debug!(environment_key, recorded, "identity changes recorded");
    }

    /// Changes for `environment_key` newer than `cursor`, plus the cursor to use next.
    ///
    /// A pending environment change wins: it is returned alone and the cursor moves past
    /// every identity change recorded so far for the key. Otherwise each newer identity
    /// change is returned once, oldest first.
    pub fn changes_since(&self, environment_key: &str, cursor: Cursor) -> (Vec<ChangeEvent>, Cursor) {
        let Some(entry) = self.changes.get(environment_key) else {
            return (Vec::new(), cursor);
        };

        if let Some(pending) = entry.environment.filter(|p| p.seq > cursor) {
            let event = ChangeEvent {
                environment_key: environment_key.to_string(),
                identifier: None,
                timestamp: pending.at,
            };
            return (vec![event], entry.max_seq().max(cursor));
        }

        let mut newer: Vec<(&String, &Pending)> = entry
            .identities
            .iter()
            .filter(|(_, p)| p.seq > cursor)
            .collect();
        newer.sort_by_key(|(_, p)| p.seq);

        let next_cursor = newer.last().map_or(cursor, |(_, p)| p.seq);
        let events = newer
            .into_iter()
            .map(|(identifier, p)| ChangeEvent {
                environment_key: environment_key.to_string(),
                identifier: Some(identifier.clone()),
                timestamp: p.at,
            })
            .collect();
        (events, next_cursor)
    }
}

/// Irreversible form of an identifier, safe to hand to stream consumers.
pub fn hash_identifier(identifier: &str) -> String {
    hex::encode(Sha256::digest(identifier.as_bytes()))
}
