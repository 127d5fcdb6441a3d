//! Notification aggregator.
//!
//! Holds the deduplicated notification list in display order (newest first)
//! and derives the unread count from it. The server's unread total is kept
//! alongside for comparison only: the published count is always
//! `entries.filter(!read).count()`, so a stale server total can never
//! visibly undo a local read.
//!
//! Local reads that the server has not confirmed yet are tracked as pending
//! reads. They are never evicted, and no snapshot taken before them may flip
//! them back to unread.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::{ChangeEvent, ChangePayload};
use crate::snapshot::NotificationsSnapshot;
use crate::types::{Notification, Origin};

pub const DEFAULT_RETAINED_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub changed: bool,
    /// Entries pushed out by the capacity bound.
    pub evicted: Vec<String>,
    pub view: NotificationView,
}

/// What a snapshot merge changed, for the engine's mutation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotMerge {
    pub changed: bool,
    /// Pending reads the snapshot shows as read on the server.
    pub confirmed_reads: Vec<String>,
    /// Pending reads a newer snapshot contradicted.
    pub overridden_reads: Vec<String>,
    /// Rolled-back reads the snapshot settled.
    pub resynced_reads: Vec<String>,
    pub evicted: Vec<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    notification: Notification,
    /// Source timestamp of the last change to `read`.
    read_changed_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct PendingRead {
    issued_at_ms: i64,
    rolled_back_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ServerTotal {
    count: u64,
    at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct NotificationAggregator {
    cap: usize,
    /// Newest first.
    entries: Vec<Entry>,
    pending_reads: HashMap<String, PendingRead>,
    /// Locally removed ids; older snapshots must not bring them back.
    removed_at_ms: HashMap<String, i64>,
    cleared_at_ms: Option<i64>,
    /// Newest timestamp the cap has evicted. While the list is full, nothing
    /// at or below it is admitted again.
    evicted_through_ms: Option<i64>,
    server_total: Option<ServerTotal>,
    needs_resync: bool,
}

impl Default for NotificationAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_CAP)
    }
}

impl NotificationAggregator {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: Vec::new(),
            pending_reads: HashMap::new(),
            removed_at_ms: HashMap::new(),
            cleared_at_ms: None,
            evicted_through_ms: None,
            server_total: None,
            needs_resync: false,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn view(&self) -> NotificationView {
        NotificationView {
            notifications: self.entries.iter().map(|e| e.notification.clone()).collect(),
            unread_count: self.unread_count(),
        }
    }

    pub fn unread_count(&self) -> u64 {
        self.entries.iter().filter(|e| !e.notification.read).count() as u64
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.position(id).map(|i| &self.entries[i].notification)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.notification.read)
            .map(|e| e.notification.id.clone())
            .collect()
    }

    /// The server's unread total disagrees with the local list in a way
    /// pending reads do not explain.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.notification.id == id)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Apply one notification-scoped event. Order events are ignored.
    pub fn ingest(&mut self, event: &ChangeEvent) -> Ingested {
        let mut evicted = Vec::new();
        let changed = match &event.payload {
            ChangePayload::Notification(n) => match self.insert_new(n.clone()) {
                Some(out) => {
                    evicted = out;
                    true
                }
                None => false,
            },
            ChangePayload::NotificationRead => self.apply_read(
                &event.entity_id,
                event.source_timestamp_ms,
                event.origin,
            ),
            ChangePayload::UnreadCount(count) => {
                self.record_server_total(*count, event.source_timestamp_ms);
                false
            }
            ChangePayload::NotificationRemoved => {
                self.remove(&event.entity_id, event.source_timestamp_ms)
            }
            ChangePayload::NotificationsCleared => self.clear(event.source_timestamp_ms),
            ChangePayload::Order(_) | ChangePayload::OrderStatus(_) => false,
        };
        Ingested {
            changed,
            evicted,
            view: self.view(),
        }
    }

    /// `None` when the id is present, was removed or cleared locally, or is
    /// older than what the cap already evicted. New entries are prepended
    /// unless they are older than the current head.
    fn insert_new(&mut self, n: Notification) -> Option<Vec<String>> {
        if self.position(&n.id).is_some() {
            debug!(notification_id = %n.id, "notification already present");
            return None;
        }
        if self
            .removed_at_ms
            .get(&n.id)
            .is_some_and(|&removed| removed >= n.timestamp_ms)
        {
            debug!(notification_id = %n.id, "dismissed notification not restored");
            return None;
        }
        if self.cleared_at_ms.is_some_and(|c| c >= n.timestamp_ms) {
            debug!(notification_id = %n.id, "cleared notification not restored");
            return None;
        }
        if self.below_eviction_horizon(n.timestamp_ms) {
            debug!(notification_id = %n.id, "older than evicted entries; not admitted");
            return None;
        }

        let at = match self.entries.first() {
            Some(head) if n.timestamp_ms < head.notification.timestamp_ms => self
                .entries
                .iter()
                .position(|e| e.notification.timestamp_ms < n.timestamp_ms)
                .unwrap_or(self.entries.len()),
            _ => 0,
        };
        let entry = Entry {
            read_changed_at_ms: n.timestamp_ms,
            notification: n,
        };
        self.entries.insert(at, entry);
        Some(self.enforce_cap())
    }

    fn below_eviction_horizon(&self, ts_ms: i64) -> bool {
        self.entries.len() >= self.cap && self.evicted_through_ms.is_some_and(|h| ts_ms <= h)
    }

    fn apply_read(&mut self, id: &str, ts_ms: i64, origin: Origin) -> bool {
        let Some(i) = self.position(id) else {
            debug!(notification_id = %id, "read for unknown notification ignored");
            return false;
        };
        match origin {
            Origin::Optimistic => {
                self.pending_reads.insert(
                    id.to_string(),
                    PendingRead {
                        issued_at_ms: ts_ms,
                        rolled_back_at_ms: None,
                    },
                );
            }
            Origin::Push | Origin::Poll => {
                self.pending_reads.remove(id);
            }
        }
        let entry = &mut self.entries[i];
        if entry.notification.read {
            return false;
        }
        entry.notification.read = true;
        entry.read_changed_at_ms = entry.read_changed_at_ms.max(ts_ms);
        true
    }

    fn record_server_total(&mut self, count: u64, at_ms: i64) {
        if let Some(prev) = self.server_total {
            if at_ms < prev.at_ms {
                debug!(count, at_ms, prev_at_ms = prev.at_ms, "older unread total ignored");
                return;
            }
        }
        self.server_total = Some(ServerTotal { count, at_ms });

        // Reads issued after the server computed its total are not in it yet.
        let unseen_reads = self
            .pending_reads
            .values()
            .filter(|p| p.issued_at_ms > at_ms)
            .count() as u64;
        let expected = count.saturating_sub(unseen_reads);
        let local = self.unread_count();
        if expected != local {
            warn!(server = count, expected, local, "unread total disagrees with local list");
            self.needs_resync = true;
        }
    }

    fn remove(&mut self, id: &str, ts_ms: i64) -> bool {
        self.removed_at_ms.insert(id.to_string(), ts_ms);
        self.pending_reads.remove(id);
        match self.position(id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self, ts_ms: i64) -> bool {
        self.cleared_at_ms = Some(self.cleared_at_ms.map_or(ts_ms, |c| c.max(ts_ms)));
        self.pending_reads.clear();
        self.removed_at_ms.clear();
        self.evicted_through_ms = None;
        let had = !self.entries.is_empty();
        self.entries.clear();
        had
    }

    // -----------------------------------------------------------------------
    // Pending-read bookkeeping (driven by the engine)
    // -----------------------------------------------------------------------

    /// The server confirmed or the mutation was abandoned.
    pub fn settle_read(&mut self, id: &str) {
        self.pending_reads.remove(id);
    }

    pub fn mark_read_rolled_back(&mut self, id: &str, now_ms: i64) {
        if let Some(p) = self.pending_reads.get_mut(id) {
            p.rolled_back_at_ms = Some(now_ms);
        }
    }

    /// Abandoned resync: keep the entry as is and let the next poll decide.
    pub fn abandon_read(&mut self, id: &str) {
        self.pending_reads.remove(id);
        self.needs_resync = true;
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn merge_snapshot(&mut self, snap: &NotificationsSnapshot, fetched_at_ms: i64) -> SnapshotMerge {
        let mut out = SnapshotMerge::default();

        if self.cleared_at_ms.is_some_and(|c| fetched_at_ms < c) {
            debug!(fetched_at_ms, "snapshot predates local clear; ignored");
            return out;
        }

        for incoming in &snap.items {
            if self
                .removed_at_ms
                .get(&incoming.id)
                .is_some_and(|&removed| fetched_at_ms < removed)
            {
                continue;
            }
            match self.position(&incoming.id) {
                Some(i) => self.merge_existing(i, incoming, fetched_at_ms, &mut out),
                None if self.below_eviction_horizon(incoming.timestamp_ms) => {}
                None => {
                    self.insert_by_timestamp(incoming.clone(), fetched_at_ms);
                    out.changed = true;
                }
            }
        }

        if let Some(count) = snap.unread_count {
            let newer = self.server_total.map_or(true, |t| fetched_at_ms >= t.at_ms);
            if newer {
                self.server_total = Some(ServerTotal {
                    count,
                    at_ms: fetched_at_ms,
                });
            }
        }
        self.needs_resync = false;

        out.evicted = self.enforce_cap();
        if !out.evicted.is_empty() {
            out.changed = true;
        }
        out
    }

    fn merge_existing(
        &mut self,
        i: usize,
        incoming: &Notification,
        fetched_at_ms: i64,
        out: &mut SnapshotMerge,
    ) {
        let id = incoming.id.clone();
        let pending = self.pending_reads.get(&id).copied();
        let entry = &mut self.entries[i];

        let before = entry.notification.clone();
        let read = entry.notification.read;
        entry.notification = Notification {
            read,
            ..incoming.clone()
        };

        match pending {
            Some(p) if incoming.read => {
                self.pending_reads.remove(&id);
                if p.rolled_back_at_ms.is_some() {
                    out.resynced_reads.push(id.clone());
                } else {
                    out.confirmed_reads.push(id.clone());
                }
                entry.notification.read = true;
            }
            Some(p) => {
                let resync = p.rolled_back_at_ms.is_some_and(|rb| fetched_at_ms >= rb);
                let newer = fetched_at_ms > p.issued_at_ms;
                if resync || newer {
                    self.pending_reads.remove(&id);
                    entry.notification.read = false;
                    entry.read_changed_at_ms = fetched_at_ms;
                    if resync {
                        out.resynced_reads.push(id.clone());
                    } else {
                        out.overridden_reads.push(id.clone());
                    }
                }
            }
            None => {
                if incoming.read != read && fetched_at_ms > entry.read_changed_at_ms {
                    entry.notification.read = incoming.read;
                    entry.read_changed_at_ms = fetched_at_ms;
                }
            }
        }

        if entry.notification != before {
            out.changed = true;
        }
    }

    fn insert_by_timestamp(&mut self, n: Notification, fetched_at_ms: i64) {
        let at = self
            .entries
            .iter()
            .position(|e| e.notification.timestamp_ms < n.timestamp_ms)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            at,
            Entry {
                read_changed_at_ms: fetched_at_ms,
                notification: n,
            },
        );
    }

    /// Evict oldest-first down to the cap, skipping pending reads. Returns
    /// the evicted ids.
    fn enforce_cap(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.cap {
            let victim = self
                .entries
                .iter()
                .rposition(|e| !self.pending_reads.contains_key(&e.notification.id));
            let Some(i) = victim else {
                break;
            };
            let gone = self.entries.remove(i).notification;
            self.evicted_through_ms = Some(
                self.evicted_through_ms
                    .map_or(gone.timestamp_ms, |h| h.max(gone.timestamp_ms)),
            );
            evicted.push(gone.id);
        }
        evicted
    }
}
