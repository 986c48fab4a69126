//! Outstanding probe tracking.
//!
//! The dispatcher records every probe before handing it to the transport,
//! the receipt handler resolves it when a reply arrives and the sweeper
//! removes it once it is too old. A single lock guards all three, so a
//! sequence number leaves the table exactly once.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::probe::Sequence;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PendingEntry {
    pub sequence: Sequence,
    pub sent_at: Instant,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<Sequence, Instant>>,
    drained: Notify,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly sent probe. A sequence already present is left
    /// untouched and `false` is returned.
    pub fn record(&self, sequence: Sequence, sent_at: Instant) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&sequence) {
            return false;
        }
        entries.insert(sequence, sent_at);
        true
    }

    /// Removes and returns the send time of `sequence`, if it is still pending.
    pub fn resolve(&self, sequence: Sequence) -> Option<Instant> {
        let mut entries = self.entries.lock();
        let sent_at = entries.remove(&sequence);
        self.notify_if_drained(&entries);
        sent_at
    }

    /// Removes and returns every entry older than `threshold`, oldest first.
    pub fn sweep_older_than(&self, threshold: Duration) -> Vec<PendingEntry> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut entries = self.entries.lock();
        entries.retain(|&sequence, &mut sent_at| {
            if now.saturating_duration_since(sent_at) > threshold {
                expired.push(PendingEntry { sequence, sent_at });
                false
            } else {
                true
            }
        });
        self.notify_if_drained(&entries);
        expired.sort_by_key(|entry| entry.sequence);
        expired
    }

    /// Removes and returns everything still pending, oldest first.
    pub fn drain(&self) -> Vec<PendingEntry> {
        let mut entries = self.entries.lock();
        let mut remaining: Vec<_> = entries
            .drain()
            .map(|(sequence, sent_at)| PendingEntry { sequence, sent_at })
            .collect();
        self.notify_if_drained(&entries);
        remaining.sort_by_key(|entry| entry.sequence);
        remaining
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Completes once the table holds no entries.
    pub(crate) async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn notify_if_drained(&self, entries: &HashMap<Sequence, Instant>) {
        if entries.is_empty() {
            self.drained.notify_waiters();
        }
    }
}
